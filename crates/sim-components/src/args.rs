//! Argument extraction helpers for method dispatch.

use serde_json::Value;
use sim_timeline::SimError;

pub(crate) fn str_arg<'a>(
    entity: &str,
    method: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a str, SimError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| bad_arg(entity, method, index, "string"))
}

pub(crate) fn u64_arg(
    entity: &str,
    method: &str,
    args: &[Value],
    index: usize,
) -> Result<u64, SimError> {
    args.get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| bad_arg(entity, method, index, "unsigned integer"))
}

pub(crate) fn f64_arg(
    entity: &str,
    method: &str,
    args: &[Value],
    index: usize,
) -> Result<f64, SimError> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| bad_arg(entity, method, index, "number"))
}

fn bad_arg(entity: &str, method: &str, index: usize, expected: &str) -> SimError {
    SimError::Entity {
        name: entity.to_owned(),
        source: anyhow::anyhow!("{method}: argument {index} must be a {expected}"),
    }
}
