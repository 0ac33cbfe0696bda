//! Binding a variable to a previously generated input.
//!
//! A bound variable takes its arguments from the referenced record's init
//! snapshot and stays read-only until the binding is cleared (index -1) or
//! the next successful generation of its entry consumes it.

use std::collections::BTreeMap;

use tracing::info;

use crate::arguments::render_raw;
use crate::cascade::{context_of, edit_open};
use crate::domain::{DetailKind, GeneratedContext, GeneratedKind, ReuseBinding, ReuseSource, Scope};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::util::base_type_name;

/// Base type names treated as the same type even though they differ.
const EQUIVALENT_TYPES: &[(&str, &str)] = &[("bool", "BoolInput")];

fn same_base_type(a: &str, b: &str) -> bool {
  let (a, b) = (base_type_name(a), base_type_name(b));
  a == b || EQUIVALENT_TYPES.iter().any(|&(x, y)| (a == x && b == y) || (a == y && b == x))
}

/// Can `entry` satisfy a variable declared as `target_type`?
pub fn is_compatible(entry: &GeneratedContext, target_type: &str) -> bool {
  entry.kind == GeneratedKind::Input && entry.init_key().is_some_and(|key| same_base_type(key, target_type))
}

/// Indices into the chosen generated list that fit `target_type`.
pub fn compatible_candidates(list: &[GeneratedContext], target_type: &str) -> Vec<usize> {
  list
    .iter()
    .enumerate()
    .filter(|(_, entry)| is_compatible(entry, target_type))
    .map(|(i, _)| i)
    .collect()
}

/// Candidates for `variable` of the open entry of `scope`, as offered in the
/// reuse picker.
pub fn candidates_for(session: &Session, scope: Scope, variable: &str, source: ReuseSource) -> Result<Vec<usize>> {
  let ctx = context_of(session, scope)?;
  let var = match ctx.open_detail().map(|d| &d.kind) {
    Some(DetailKind::Algo(a)) => a.variable(variable),
    Some(DetailKind::Input(i)) => i.variable(variable),
    None => return Err(Error::NoOpenDetail),
  }
  .ok_or_else(|| Error::validation(format!("unknown variable '{variable}'")))?;
  let list = session.state().generated_list(scope, source).unwrap_or_default();
  Ok(compatible_candidates(list, &var.ty))
}

/// Argument map copied from a record's init snapshot. Object snapshots map
/// key for key; anything else lands under the variable's single argument.
fn copied_arguments(init: &serde_json::Value, declared: &[String]) -> BTreeMap<String, String> {
  match init {
    serde_json::Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), render_raw(v))).collect(),
    other => declared.iter().take(1).map(|name| (name.clone(), render_raw(other))).collect(),
  }
}

/// Point `variable` of the open entry of `scope` at record `index` of the
/// local or outer generated list, or clear the binding with `-1`.
pub fn use_generated_input(
  session: &mut Session,
  scope: Scope,
  variable: &str,
  source: ReuseSource,
  index: i64,
) -> Result<()> {
  let entry = if index < 0 {
    None
  } else {
    let list = session
      .state()
      .generated_list(scope, source)
      .ok_or(match scope {
        Scope::Sub(i) => Error::UnknownSubQuestion(i),
        Scope::Outer => Error::NoOpenDetail,
      })?;
    let entry = usize::try_from(index)
      .ok()
      .and_then(|i| list.get(i))
      .ok_or_else(|| Error::validation(format!("no generated entry at index {index}")))?;
    Some((index as usize, entry.clone()))
  };

  edit_open(session, scope, |kind| {
    let (var, subclass, reuse, args, init) = match kind {
      DetailKind::Algo(a) => (
        a.variable(variable).cloned(),
        a.selected_subclasses.get(variable).cloned(),
        &mut a.reuse,
        &mut a.variable_arguments,
        Some(&mut a.arguments_init),
      ),
      DetailKind::Input(i) => (i.variable(variable).cloned(), None, &mut i.reuse, &mut i.input_variable_arguments, None),
    };
    let var = var.ok_or_else(|| Error::validation(format!("unknown variable '{variable}'")))?;

    match &entry {
      None => {
        reuse.remove(variable);
        // back to manual entry: empty placeholders for the declared arguments
        let placeholders = var
          .arguments_for(subclass.as_deref())
          .iter()
          .map(|a| (a.name.clone(), String::new()))
          .collect();
        args.insert(variable.to_string(), placeholders);
        if let Some(init) = init {
          init.remove(variable);
        }
      }
      Some((index, record)) => {
        if !is_compatible(record, &var.ty) {
          return Err(Error::validation(format!(
            "generated entry {index} does not match the type '{}' of '{variable}'",
            var.ty
          )));
        }
        let snapshot = record.init_key().and_then(|k| record.context_init.get(k)).cloned().unwrap_or_default();
        let declared: Vec<String> =
          var.arguments_for(subclass.as_deref()).iter().map(|a| a.name.clone()).collect();
        args.insert(variable.to_string(), copied_arguments(&snapshot, &declared));
        reuse.insert(
          variable.to_string(),
          ReuseBinding { source, index: *index, generated_id: record.id, init: snapshot },
        );
      }
    }
    Ok(())
  })?;

  info!(target: "generation", ?scope, variable, ?source, index, "Reuse binding updated");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cascade::{edit_open_algo, select_subclass, set_argument};
  use crate::domain::{ArgumentDecl, DetailId, SubclassDecl, VariableDescriptor};
  use crate::reducer::Action;
  use crate::session::test_identity;
  use serde_json::json;
  use uuid::Uuid;

  fn input_record(init_key: &str, init: serde_json::Value) -> GeneratedContext {
    GeneratedContext {
      id: Uuid::new_v4(),
      kind: GeneratedKind::Input,
      detail_id: DetailId(0),
      context: BTreeMap::new(),
      context_init: BTreeMap::from([(init_key.to_string(), init)]),
      has_output: false,
      name: None,
    }
  }

  fn var(name: &str, ty: &str, args: &[&str]) -> VariableDescriptor {
    VariableDescriptor {
      name: name.into(),
      ty: ty.into(),
      arguments: args.iter().map(|a| ArgumentDecl { name: a.to_string(), ty: "int".into() }).collect(),
      subclasses: vec![],
    }
  }

  fn session_with_generated() -> Session {
    let mut s = Session::new(test_identity());
    s.dispatch(Action::AppendGeneratedContext {
      scope: Scope::Outer,
      record: input_record("ArrayInput[int]", json!({"size": 4, "low": 0})),
    });
    s.dispatch(Action::AppendGeneratedContext {
      scope: Scope::Outer,
      record: input_record("BoolInput", json!(true)),
    });
    edit_open_algo(&mut s, Scope::Outer, true, |a| {
      a.algo_variables = vec![var("arr", "ArrayInput[int]", &["size", "low"]), var("flag", "bool", &["value"])];
      Ok(())
    })
    .unwrap();
    s
  }

  #[test]
  fn compatibility_compares_base_types() {
    let entry = input_record("ArrayInput[int]", json!({}));
    assert!(is_compatible(&entry, "ArrayInput[int]"));
    assert!(is_compatible(&entry, "ArrayInput[float]"));
    assert!(!is_compatible(&entry, "StringInput"));
  }

  #[test]
  fn bool_and_bool_input_are_equivalent_both_ways() {
    assert!(is_compatible(&input_record("BoolInput", json!(true)), "bool"));
    assert!(is_compatible(&input_record("bool", json!(true)), "BoolInput"));
    assert!(!is_compatible(&input_record("BoolInput", json!(true)), "int"));
  }

  #[test]
  fn algo_records_are_never_candidates() {
    let mut algo = input_record("ArrayInput[int]", json!({}));
    algo.kind = GeneratedKind::Algo;
    let list = vec![algo, input_record("ArrayInput[int]", json!({}))];
    assert_eq!(compatible_candidates(&list, "ArrayInput[int]"), [1]);
  }

  #[test]
  fn reuse_overwrites_manual_arguments_and_locks_them() {
    let mut s = session_with_generated();
    set_argument(&mut s, Scope::Outer, "arr", "size", "10".into()).unwrap();
    use_generated_input(&mut s, Scope::Outer, "arr", ReuseSource::Local, 0).unwrap();

    let algo = s.state().context.open_algo().unwrap();
    assert_eq!(algo.variable_arguments["arr"]["size"], "4");
    assert_eq!(algo.variable_arguments["arr"]["low"], "0");
    assert_eq!(algo.reuse["arr"].init, json!({"size": 4, "low": 0}));

    let err = set_argument(&mut s, Scope::Outer, "arr", "size", "11".into()).unwrap_err();
    assert_eq!(err, Error::ReuseActive("arr".into()));
  }

  #[test]
  fn clearing_reuse_restores_manual_entry() {
    let mut s = session_with_generated();
    use_generated_input(&mut s, Scope::Outer, "arr", ReuseSource::Local, 0).unwrap();
    edit_open_algo(&mut s, Scope::Outer, false, |a| {
      a.arguments_init.insert("arr".into(), json!({"size": 4}));
      Ok(())
    })
    .unwrap();

    use_generated_input(&mut s, Scope::Outer, "arr", ReuseSource::Local, -1).unwrap();
    let algo = s.state().context.open_algo().unwrap();
    assert!(algo.reuse.is_empty());
    assert!(!algo.arguments_init.contains_key("arr"));
    assert_eq!(
      algo.variable_arguments["arr"],
      BTreeMap::from([("size".to_string(), String::new()), ("low".to_string(), String::new())])
    );
    set_argument(&mut s, Scope::Outer, "arr", "size", "7".into()).unwrap();
  }

  #[test]
  fn clearing_reuse_restores_the_chosen_subclass_arguments() {
    let mut s = session_with_generated();
    edit_open_algo(&mut s, Scope::Outer, false, |a| {
      let mut g = var("g", "ArrayInput[int]", &["size"]);
      g.subclasses = vec![SubclassDecl {
        name: "Tree".into(),
        arguments: vec![ArgumentDecl { name: "depth".into(), ty: "int".into() }],
      }];
      a.algo_variables.push(g);
      Ok(())
    })
    .unwrap();
    select_subclass(&mut s, Scope::Outer, "g", "Tree").unwrap();

    use_generated_input(&mut s, Scope::Outer, "g", ReuseSource::Local, 0).unwrap();
    use_generated_input(&mut s, Scope::Outer, "g", ReuseSource::Local, -1).unwrap();
    let algo = s.state().context.open_algo().unwrap();
    assert_eq!(algo.variable_arguments["g"], BTreeMap::from([("depth".to_string(), String::new())]));
  }

  #[test]
  fn scalar_snapshot_fills_single_argument() {
    let mut s = session_with_generated();
    use_generated_input(&mut s, Scope::Outer, "flag", ReuseSource::Local, 1).unwrap();
    let algo = s.state().context.open_algo().unwrap();
    assert_eq!(algo.variable_arguments["flag"]["value"], "true");
  }

  #[test]
  fn incompatible_or_missing_entries_are_rejected() {
    let mut s = session_with_generated();
    assert!(matches!(
      use_generated_input(&mut s, Scope::Outer, "flag", ReuseSource::Local, 0),
      Err(Error::Validation(_))
    ));
    assert!(matches!(
      use_generated_input(&mut s, Scope::Outer, "arr", ReuseSource::Local, 5),
      Err(Error::Validation(_))
    ));
    assert!(s.state().context.open_algo().unwrap().reuse.is_empty());
  }

  #[test]
  fn candidates_follow_variable_type() {
    let s = session_with_generated();
    assert_eq!(candidates_for(&s, Scope::Outer, "arr", ReuseSource::Local).unwrap(), [0]);
    assert_eq!(candidates_for(&s, Scope::Outer, "flag", ReuseSource::Local).unwrap(), [1]);
    assert!(candidates_for(&s, Scope::Outer, "nope", ReuseSource::Local).is_err());
  }

  #[test]
  fn sub_question_can_reuse_outer_records() {
    let mut s = session_with_generated();
    s.dispatch(Action::AddSubQuestion);
    edit_open_algo(&mut s, Scope::Sub(0), true, |a| {
      a.algo_variables = vec![var("arr", "ArrayInput[int]", &["size", "low"])];
      Ok(())
    })
    .unwrap();

    // nothing generated locally yet
    assert!(use_generated_input(&mut s, Scope::Sub(0), "arr", ReuseSource::Local, 0).is_err());
    use_generated_input(&mut s, Scope::Sub(0), "arr", ReuseSource::Outer, 0).unwrap();

    let inner = s.state().sub_questions[0].context.open_algo().unwrap();
    assert_eq!(inner.reuse["arr"].source, ReuseSource::Outer);
    assert_eq!(inner.reuse["arr"].generated_id, s.state().context.generated[0].id);
  }
}
