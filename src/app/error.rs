use std::collections::BTreeMap;

use crate::infra::store::StoreError;

/// Field-keyed validation messages. Fields are kept sorted by name, so
/// [`first_message`](Self::first_message) reports the alphabetically first field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.fields {
            self.fields.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    /// First message of the first field by name, used as the headline of an
    /// error response.
    pub fn first_message(&self) -> Option<&str> {
        self.fields
            .values()
            .flat_map(|messages| messages.iter())
            .map(String::as_str)
            .next()
    }

    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(self))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("validation failed")]
    Validation(ValidationErrors),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("Unauthorized.")]
    Unauthorized,
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("storage failure: {0}")]
    Internal(#[from] StoreError),
    #[error("{0}")]
    Unexpected(String),
}

impl ServiceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(ValidationErrors::single(field, message))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Checks a required free-text field: present, non-blank, at most `max` chars.
pub(crate) fn check_text(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&str>,
    max: usize,
) {
    match value {
        None => errors.add(field, format!("The {} field is required.", field)),
        Some(value) if value.trim().is_empty() => {
            errors.add(field, format!("The {} field is required.", field))
        }
        Some(value) if value.chars().count() > max => errors.add(
            field,
            format!("The {} field must not be greater than {} characters.", field, max),
        ),
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_text_reports_missing_blank_and_long_values() {
        let mut errors = ValidationErrors::new();
        check_text(&mut errors, "title", None, 5);
        check_text(&mut errors, "content", Some("   "), 5);
        check_text(&mut errors, "comment", Some("toolong"), 5);
        check_text(&mut errors, "name", Some("fine"), 5);

        assert!(errors.contains("title"));
        assert!(errors.contains("content"));
        assert_eq!(
            errors.fields()["comment"],
            vec!["The comment field must not be greater than 5 characters.".to_string()]
        );
        assert!(!errors.contains("name"));
    }

    #[test]
    fn limits_count_characters_not_bytes() {
        let mut errors = ValidationErrors::new();
        check_text(&mut errors, "title", Some("ééééé"), 5);
        assert!(errors.is_empty());
    }

    #[test]
    fn first_message_follows_field_name_order() {
        let mut errors = ValidationErrors::new();
        errors.add("title", "The title field is required.");
        errors.add("content", "The content field is required.");
        errors.add("content", "second");
        assert_eq!(errors.first_message(), Some("The content field is required."));
    }

    #[test]
    fn empty_errors_convert_to_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
        assert!(matches!(
            ValidationErrors::single("tags", "bad").into_result(),
            Err(ServiceError::Validation(_))
        ));
    }
}
