use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// What stub generation and default-argument inference need from a method
/// descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodShape<'a> {
    /// Raw parameter list, without the parentheses.
    pub(crate) parameters: &'a str,
    pub(crate) return_type: &'a str,
    pub(crate) parameter_count: usize,
    /// Local variable slots taken by the parameters, excluding `this`.
    pub(crate) argument_slots: usize,
    pub(crate) returns_void: bool,
}

pub(crate) fn method_shape(descriptor: &str) -> Result<MethodShape<'_>> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .with_context(|| format!("invalid method descriptor {descriptor}"))?;
    let rest = descriptor
        .strip_prefix('(')
        .context("method descriptor without parameter list")?;
    let close = rest.find(')').context("unterminated parameter list")?;
    let argument_slots = parsed
        .parameter_types()
        .iter()
        .map(|parameter| match parameter {
            TypeDescriptor::Long | TypeDescriptor::Double => 2,
            _ => 1,
        })
        .sum();
    Ok(MethodShape {
        parameters: &rest[..close],
        return_type: &rest[close + 1..],
        parameter_count: parsed.parameter_types().len(),
        argument_slots,
        returns_void: matches!(parsed.return_type(), TypeDescriptor::Void),
    })
}

/// Whether a field descriptor occupies two stack slots.
pub(crate) fn is_wide_field(descriptor: &str) -> bool {
    matches!(descriptor.as_bytes().first(), Some(b'J' | b'D'))
}
