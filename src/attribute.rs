use crate::error::{Error, Result};

/// Tuple of attribute and its value
///
/// This type is used for both training and prediction (tagging).
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Value of the attribute
    pub value: f64,
}

impl Attribute {
    /// Create a new attribute with a name and value
    pub fn new<T: Into<String>>(name: T, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Check that the attribute can be stored in a model.
    ///
    /// Names end up in NUL-terminated dictionary records and values feed
    /// straight into the objective, so both are checked up front.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.contains('\0') {
            return Err(Error::invalid_input(format!(
                "attribute name {:?} contains a NUL byte",
                self.name
            )));
        }
        if !self.value.is_finite() {
            return Err(Error::invalid_input(format!(
                "attribute {:?} has a non-finite value",
                self.name
            )));
        }
        Ok(())
    }
}

impl From<String> for Attribute {
    fn from(name: String) -> Self {
        Self { name, value: 1.0 }
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: 1.0,
        }
    }
}

impl<S: Into<String>> From<(S, f64)> for Attribute {
    fn from((name, value): (S, f64)) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
