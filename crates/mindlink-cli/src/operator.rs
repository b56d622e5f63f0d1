//! [`OperatorEngine`] – a human at the keyboard standing in for the rule
//! engine.
//!
//! Typed lines are queued as [`Op`]s and applied to the output link at the
//! start of the next decision cycle, so the bridge sees them exactly as it
//! would see rule firings.

use std::collections::VecDeque;

use mindlink_kernel::command_table;
use mindlink_memory::{Batch, FactId, FactTree, Value, WorkingMemory};
use mindlink_runtime::DecisionEngine;
use mindlink_types::BridgeError;
use tracing::{debug, info};

/// One queued operator intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Create `^name <id>` on the output link with the given parameters.
    Request {
        name: String,
        params: Vec<(String, Value)>,
    },
    /// Remove a top-level request by fact id.
    Retract(FactId),
    /// Remove every top-level fact under the output link.
    Clear,
}

/// Parse an operator line such as `drive-forward distance=50 speed=30`.
///
/// Numbers become ints or floats, anything else a string.  Double quotes
/// group words: `say-text text="hello there"`.
pub fn parse_line(line: &str) -> Result<Op, String> {
    let mut tokens = tokenize(line)?.into_iter();
    let name = tokens.next().ok_or_else(|| "empty request".to_string())?;
    if name.contains('=') {
        return Err(format!("expected a command name, got '{name}'"));
    }
    let params = tokens
        .map(|tok| {
            let (key, raw) = tok
                .split_once('=')
                .ok_or_else(|| format!("expected key=value, got '{tok}'"))?;
            if key.is_empty() {
                return Err(format!("missing parameter name in '{tok}'"));
            }
            Ok((key.to_string(), parse_value(raw)))
        })
        .collect::<Result<Vec<_>, String>>()?;
    Ok(Op::Request { name, params })
}

fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::Str(raw.to_string())
    }
}

fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if quoted {
        return Err("unterminated quote".to_string());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Decision engine driven by queued operator input.
#[derive(Debug, Default)]
pub struct OperatorEngine {
    pending: VecDeque<Op>,
    issued: Vec<(FactId, String)>,
}

impl OperatorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `op` for the next cycle.  Returns `false` (and still queues it)
    /// when a request names a command the bridge does not know, since the
    /// bridge will ignore it.
    pub fn push(&mut self, op: Op) -> bool {
        let known = match &op {
            Op::Request { name, .. } => command_table::lookup(name).is_some(),
            _ => true,
        };
        self.pending.push_back(op);
        known
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Requests written since the last call, as `(fact id, command name)`.
    pub fn take_issued(&mut self) -> Vec<(FactId, String)> {
        std::mem::take(&mut self.issued)
    }

    fn apply(&mut self, wm: &mut WorkingMemory, op: Op) -> Result<(), BridgeError> {
        let out = wm.output_link();
        match op {
            Op::Request { name, params } => {
                let tree = params
                    .into_iter()
                    .fold(FactTree::branch(), |tree, (k, v)| tree.with(k, v));
                let fact = wm
                    .insert_tree(out, name.as_str(), tree)
                    .map_err(|e| BridgeError::Protocol(e.to_string()))?;
                info!(request = %fact, command = %name, "operator request written");
                self.issued.push((fact, name));
                Ok(())
            }
            Op::Retract(fact) => {
                let on_output = wm.fact(fact).is_some_and(|f| f.parent == out);
                if !on_output {
                    return Err(BridgeError::MalformedRequest {
                        command: "retract".to_string(),
                        details: format!("{fact} is not a request on the output link"),
                    });
                }
                wm.remove(fact)
                    .map_err(|e| BridgeError::Protocol(e.to_string()))?;
                info!(request = %fact, "operator retracted request");
                Ok(())
            }
            Op::Clear => {
                let mut batch = Batch::new();
                for fact in wm.children(out) {
                    batch.remove(fact.id);
                }
                let removed = batch.removals().len();
                wm.apply(batch)
                    .map_err(|e| BridgeError::Protocol(e.to_string()))?;
                info!(removed, "operator cleared the output link");
                Ok(())
            }
        }
    }
}

impl DecisionEngine for OperatorEngine {
    fn name(&self) -> &str {
        "operator"
    }

    /// Apply every queued op.  A bad retraction is reported after the rest
    /// of the queue has been applied.
    fn cycle(&mut self, wm: &mut WorkingMemory) -> Result<(), BridgeError> {
        let mut first_error = None;
        while let Some(op) = self.pending.pop_front() {
            debug!(?op, "applying operator op");
            match self.apply(wm, op) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_and_strings() {
        let op = parse_line("drive-forward distance=50 speed=30.5 note=slow").unwrap();
        assert_eq!(
            op,
            Op::Request {
                name: "drive-forward".to_string(),
                params: vec![
                    ("distance".to_string(), Value::Int(50)),
                    ("speed".to_string(), Value::Float(30.5)),
                    ("note".to_string(), Value::Str("slow".to_string())),
                ],
            }
        );
    }

    #[test]
    fn quotes_group_words() {
        let op = parse_line(r#"say-text text="hello there""#).unwrap();
        match op {
            Op::Request { params, .. } => {
                assert_eq!(params, vec![("text".to_string(), Value::Str("hello there".into()))]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_lines() {
        assert!(parse_line("   ").is_err());
        assert!(parse_line("distance=50").is_err());
        assert!(parse_line("drive-forward 50").is_err());
        assert!(parse_line("say-text text=\"oops").is_err());
        assert!(parse_line("drive-forward =5").is_err());
    }

    #[test]
    fn push_flags_unknown_commands() {
        let mut engine = OperatorEngine::new();
        assert!(engine.push(parse_line("stop-all-motors").unwrap()));
        assert!(!engine.push(parse_line("fly-away").unwrap()));
        assert_eq!(engine.pending(), 2);
    }

    #[test]
    fn cycle_writes_requests_under_the_output_link() {
        let mut wm = WorkingMemory::new();
        let mut engine = OperatorEngine::new();
        engine.push(parse_line("drive-forward distance=50 speed=30").unwrap());
        engine.cycle(&mut wm).unwrap();

        let issued = engine.take_issued();
        assert_eq!(issued.len(), 1);
        let fact = wm.fact(issued[0].0).unwrap();
        assert_eq!(fact.parent, wm.output_link());
        assert_eq!(fact.attr, "drive-forward");
        let node = fact.value.as_id().unwrap();
        assert_eq!(wm.child_value(node, "distance").and_then(Value::as_i64), Some(50));
        assert!(engine.take_issued().is_empty());
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn retract_removes_only_output_requests() {
        let mut wm = WorkingMemory::new();
        let mut engine = OperatorEngine::new();
        engine.push(parse_line("set-backpack-lights color=red").unwrap());
        engine.cycle(&mut wm).unwrap();
        let (fact, _) = engine.take_issued()[0].clone();

        engine.push(Op::Retract(fact));
        engine.cycle(&mut wm).unwrap();
        assert!(!wm.contains(fact));

        engine.push(Op::Retract(fact));
        let err = engine.cycle(&mut wm).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn bad_retraction_does_not_block_the_queue() {
        let mut wm = WorkingMemory::new();
        let mut engine = OperatorEngine::new();
        engine.push(Op::Retract(FactId::new(9999)));
        engine.push(parse_line("stop-all-motors").unwrap());
        assert!(engine.cycle(&mut wm).is_err());
        assert_eq!(wm.children(wm.output_link()).count(), 1);
    }

    #[test]
    fn clear_empties_the_output_link() {
        let mut wm = WorkingMemory::new();
        let mut engine = OperatorEngine::new();
        engine.push(parse_line("stop-all-motors").unwrap());
        engine.push(parse_line("say-text text=hi").unwrap());
        engine.cycle(&mut wm).unwrap();
        assert_eq!(wm.children(wm.output_link()).count(), 2);

        engine.push(Op::Clear);
        engine.cycle(&mut wm).unwrap();
        assert_eq!(wm.children(wm.output_link()).count(), 0);
    }
}
