use serde::Serialize;

/// A field-level validation error.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: String,
}

/// Container for validation errors, carried by `LokstraError::Binding`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationErrorResponse {
    pub errors: Vec<FieldError>,
}

/// Converts a `garde::Report` into the wire-level field list `LokstraError`
/// exposes as `error.fields`.
pub fn convert_garde_report(report: &garde::Report) -> ValidationErrorResponse {
    let mut field_errors = Vec::new();

    for (path, error) in report.iter() {
        let field = {
            let s = path.to_string();
            if s.is_empty() { "value".to_string() } else { s }
        };
        field_errors.push(FieldError {
            field,
            message: error.message().to_string(),
            code: "validation".to_string(),
        });
    }

    ValidationErrorResponse {
        errors: field_errors,
    }
}

/// Autoref specialization used by the `#[derive(Bind)]` macro: calls
/// `validate()` when the bound type implements `garde::Validate`, and is a
/// no-op otherwise, without requiring a `where T: Validate` bound at the
/// call site.
pub struct AutoValidator<'a, T>(pub &'a T);

pub trait DoValidate {
    fn maybe_validate(&self) -> Result<(), ValidationErrorResponse>;
}

impl<T: garde::Validate> DoValidate for AutoValidator<'_, T>
where
    T::Context: Default,
{
    fn maybe_validate(&self) -> Result<(), ValidationErrorResponse> {
        self.0
            .validate()
            .map_err(|report| convert_garde_report(&report))
    }
}

pub trait SkipValidate {
    fn maybe_validate(&self) -> Result<(), ValidationErrorResponse>;
}

impl<T> SkipValidate for &AutoValidator<'_, T> {
    fn maybe_validate(&self) -> Result<(), ValidationErrorResponse> {
        Ok(())
    }
}

pub use garde::Validate;

#[cfg(test)]
mod tests {
    use super::*;
    use garde::Validate;

    #[derive(Validate)]
    struct Signup {
        #[garde(length(min = 3))]
        username: String,
    }

    #[test]
    fn convert_garde_report_produces_field_errors() {
        let signup = Signup { username: "ab".into() };
        let report = signup.validate().unwrap_err();
        let resp = convert_garde_report(&report);
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].field, "username");
    }

    #[test]
    fn autoref_specialization_runs_validate_when_implemented() {
        let signup = Signup { username: "ab".into() };
        let result = (&AutoValidator(&signup)).maybe_validate();
        assert!(result.is_err());
    }

    #[test]
    fn autoref_specialization_skips_types_without_validate() {
        struct NotValidated;
        let result = (&AutoValidator(&NotValidated)).maybe_validate();
        assert!(result.is_ok());
    }
}
