use std::fmt::Write;

use crate::models::{GradeValue, Guardian, ThresholdDefinition};

pub const LOW_GRADE_SUBJECT: &str = "Low grade alert";

pub fn alert_message(value: &GradeValue) -> String {
    format!("Grade below threshold: {value}")
}

/// Email body sent to one guardian about a below-threshold grade.
pub fn guardian_email_body(
    guardian: &Guardian,
    student_id: &str,
    value: &GradeValue,
    threshold: &ThresholdDefinition,
) -> String {
    let mut output = String::new();
    let name = guardian.name.trim();
    let minimum = threshold
        .minimum()
        .unwrap_or_else(|| "not configured".to_string());

    if name.is_empty() {
        let _ = writeln!(output, "Dear guardian,");
    } else {
        let _ = writeln!(output, "Dear {name},");
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "A grade recorded for student {student_id} is below the minimum set for this scale."
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "Grade obtained: {value}");
    let _ = writeln!(output, "Minimum expected: {minimum}");
    let _ = writeln!(output);
    let _ = writeln!(output, "Please contact the teacher for more information.");
    let _ = writeln!(output);
    let _ = write!(output, "Academic Management System");

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guardian(name: &str) -> Guardian {
        Guardian {
            id: "G1".to_string(),
            email: Some("g1@example.com".to_string()),
            name: name.to_string(),
        }
    }

    #[test]
    fn body_names_value_and_minimum() {
        let threshold = ThresholdDefinition {
            scale_id: "S1".to_string(),
            min_numeric: Some(11.0),
            min_literal: None,
        };
        let body = guardian_email_body(
            &guardian("Rosa Diaz"),
            "A1",
            &GradeValue::Numeric(9.0),
            &threshold,
        );
        assert!(body.starts_with("Dear Rosa Diaz,"));
        assert!(body.contains("student A1"));
        assert!(body.contains("Grade obtained: 9"));
        assert!(body.contains("Minimum expected: 11"));
    }

    #[test]
    fn falls_back_for_unnamed_guardian_and_literal_scale() {
        let threshold = ThresholdDefinition {
            scale_id: "S2".to_string(),
            min_numeric: None,
            min_literal: Some("A".to_string()),
        };
        let body = guardian_email_body(
            &guardian(" "),
            "A2",
            &GradeValue::Literal("C".to_string()),
            &threshold,
        );
        assert!(body.starts_with("Dear guardian,"));
        assert!(body.contains("Grade obtained: C"));
        assert!(body.contains("Minimum expected: A"));
    }

    #[test]
    fn alert_message_embeds_value() {
        assert_eq!(
            alert_message(&GradeValue::Numeric(10.5)),
            "Grade below threshold: 10.5"
        );
    }
}
