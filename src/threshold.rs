use crate::models::{GradeValue, ThresholdDefinition};

/// Decides whether a recorded value breaches the scale's minimum.
///
/// Numeric grades compare against `min_numeric`. Literal grades breach when they
/// differ from `min_literal`; there is no ordering between letter grades yet.
/// A missing or mismatched threshold field is never a breach.
pub fn is_below_threshold(value: &GradeValue, threshold: &ThresholdDefinition) -> bool {
    match (value, threshold.min_numeric, threshold.min_literal.as_deref()) {
        (GradeValue::Numeric(grade), Some(minimum), _) => *grade < minimum,
        (GradeValue::Literal(grade), _, Some(minimum)) => grade != minimum,
        _ => false,
    }
}
