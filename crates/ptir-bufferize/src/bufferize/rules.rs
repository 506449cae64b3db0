//! Per-op aliasing rules.

use crate::spec::{CustomCallSpec, Operation};

/// Attribute naming the operand a custom call returns a view of.
pub const VIEW_OF_ATTR: &str = "view_of";
/// Attribute naming the operand a custom call may overwrite with its result.
pub const INPLACE_OPERAND_ATTR: &str = "inplace_operand";

/// How an operation's result relates to the storage of its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasRule {
    /// The result reinterprets operand `source`; always shares its buffer.
    View { source: usize },
    /// The result is written into operand `operand` when that buffer is free.
    Destination { operand: usize },
    /// Elementwise op that may compute into a same-typed operand.
    InPlaceCandidate,
    /// The result is new content unrelated to any operand buffer.
    Fresh,
    /// Structured control flow; handled together with its regions.
    Structured,
    /// Merges values from divergent predecessors; cannot be classified safely.
    Unstructured,
}

/// A custom call's aliasing attribute is not a valid operand index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleAttrError {
    pub attr: &'static str,
    pub value: i64,
}

pub fn alias_rule(op: &Operation) -> Result<AliasRule, RuleAttrError> {
    Ok(match op {
        Operation::Reshape
        | Operation::StopGradient
        | Operation::Slice { .. }
        | Operation::Transpose { .. }
        | Operation::DynamicSlice { .. } => AliasRule::View { source: 0 },
        Operation::DynamicUpdateSlice | Operation::ScatterAdd { .. } => {
            AliasRule::Destination { operand: 0 }
        }
        Operation::ElementwiseUnary(_)
        | Operation::ElementwiseBinary(_)
        | Operation::Compare(_)
        | Operation::Select
        | Operation::Cast => AliasRule::InPlaceCandidate,
        Operation::Constant(_)
        | Operation::Iota { .. }
        | Operation::Empty
        | Operation::BroadcastTo
        | Operation::Concat { .. }
        | Operation::DotGeneral(_)
        | Operation::Reduce { .. }
        | Operation::Gather { .. } => AliasRule::Fresh,
        Operation::Cond(_) | Operation::While(_) | Operation::Scan(_) => AliasRule::Structured,
        Operation::Phi => AliasRule::Unstructured,
        Operation::CustomCall(spec) => custom_call_rule(spec)?,
    })
}

fn custom_call_rule(spec: &CustomCallSpec) -> Result<AliasRule, RuleAttrError> {
    let index = |attr: &'static str, value: i64| {
        usize::try_from(value).map_err(|_| RuleAttrError { attr, value })
    };
    if let Some(value) = spec.attr_i64(VIEW_OF_ATTR) {
        return Ok(AliasRule::View {
            source: index(VIEW_OF_ATTR, value)?,
        });
    }
    if let Some(value) = spec.attr_i64(INPLACE_OPERAND_ATTR) {
        return Ok(AliasRule::Destination {
            operand: index(INPLACE_OPERAND_ATTR, value)?,
        });
    }
    Ok(AliasRule::Fresh)
}

/// Results of these ops are immutable storage and never a write destination.
pub fn is_read_only_source(op: &Operation) -> bool {
    matches!(op, Operation::Constant(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{CustomCallAttr, ElementwiseUnaryOp};

    #[test]
    fn custom_call_attrs_pick_view_before_destination() {
        let both = CustomCallSpec::new("fused")
            .with_attr(INPLACE_OPERAND_ATTR, CustomCallAttr::I64(0))
            .with_attr(VIEW_OF_ATTR, CustomCallAttr::I64(1));
        assert_eq!(
            alias_rule(&Operation::CustomCall(both)),
            Ok(AliasRule::View { source: 1 })
        );

        let negative =
            CustomCallSpec::new("bad").with_attr(VIEW_OF_ATTR, CustomCallAttr::I64(-2));
        assert_eq!(
            alias_rule(&Operation::CustomCall(negative)),
            Err(RuleAttrError {
                attr: VIEW_OF_ATTR,
                value: -2
            })
        );
        assert_eq!(
            alias_rule(&Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp)),
            Ok(AliasRule::InPlaceCandidate)
        );
        assert_eq!(alias_rule(&Operation::Phi), Ok(AliasRule::Unstructured));
    }
}
