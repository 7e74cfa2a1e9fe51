//! Input validation and `{{name}}` prompt rendering.

use crate::engine::domain::InputValues;
use crate::engine::error::EngineError;

/// Fails on the first required input that is absent or blank, in declaration order.
pub fn validate_inputs(required: &[String], inputs: &InputValues) -> Result<(), EngineError> {
    for name in required {
        let present = inputs.get(name).is_some_and(|v| !v.trim().is_empty());
        if !present {
            return Err(EngineError::MissingInput(name.clone()));
        }
    }
    Ok(())
}

/// Substitute `{{name}}` placeholders with input values in a single pass.
///
/// Placeholders without a matching input are left as written. Substituted
/// values are not rescanned.
pub fn render(template: &str, inputs: &InputValues) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };

        let name = &after_open[..close];
        match inputs.get(name) {
            Some(value) => out.push_str(value),
            None => {
                out.push_str("{{");
                out.push_str(name);
                out.push_str("}}");
            }
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pairs: &[(&str, &str)]) -> InputValues {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let out = render(
            "Review {{applicant_name}} for a {{loan_amount}} loan.",
            &inputs(&[("applicant_name", "Dana Reyes"), ("loan_amount", "$420,000")]),
        );
        assert_eq!(out, "Review Dana Reyes for a $420,000 loan.");
    }

    #[test]
    fn test_render_leaves_unmatched_verbatim() {
        let out = render(
            "Hello {{name}}, rate {{rate}}, broken {{tail",
            &inputs(&[("name", "Ana")]),
        );
        assert_eq!(out, "Hello Ana, rate {{rate}}, broken {{tail");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let out = render("{{a}}", &inputs(&[("a", "{{b}}"), ("b", "x")]));
        assert_eq!(out, "{{b}}");
    }

    #[test]
    fn test_validate_reports_first_missing_or_blank() {
        let required = vec![
            "applicant_name".to_string(),
            "loan_amount".to_string(),
            "property_address".to_string(),
        ];

        let err = validate_inputs(&required, &inputs(&[("applicant_name", "Dana")])).unwrap_err();
        assert!(matches!(err, EngineError::MissingInput(ref n) if n == "loan_amount"));

        let err = validate_inputs(
            &required,
            &inputs(&[("applicant_name", "  "), ("loan_amount", "1")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("applicant_name"));

        assert!(validate_inputs(
            &required,
            &inputs(&[
                ("applicant_name", "Dana"),
                ("loan_amount", "1"),
                ("property_address", "12 Elm St")
            ])
        )
        .is_ok());
    }
}
