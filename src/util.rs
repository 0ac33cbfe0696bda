//! Small utility helpers used across modules.

/// Type name without generic parameters: `ArrayInput[int]` -> `ArrayInput`.
pub fn base_type_name(ty: &str) -> &str {
  ty.split('[').next().unwrap_or(ty).trim()
}

/// Names referenced as `{name}` in a question description.
/// Only identifier-like names count, so literal braces in prose are ignored.
pub fn description_placeholders(text: &str) -> Vec<&str> {
  let mut out = Vec::new();
  let mut rest = text;
  while let Some(start) = rest.find('{') {
    let after = &rest[start + 1..];
    match after.find('}') {
      Some(end) => {
        let name = &after[..end];
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
          out.push(name);
        }
        rest = &after[end + 1..];
      }
      None => break,
    }
  }
  out
}

/// Log-safe truncation for large strings (user code, descriptions).
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}
