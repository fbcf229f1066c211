//! Caller-submitted observations.
//!
//! An observation is an `(email?, phoneNumber?)` pair. Construction normalizes
//! and validates it, so the engine only ever sees well-formed input.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ValidationError;

/// Maximum accepted email length (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 320;

/// Maximum accepted phone number length.
pub const MAX_PHONE_LEN: usize = 32;

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@.]+(\.[^\s@.]+)+$").expect("email pattern is a valid regex")
    })
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "email",
            max_length: MAX_EMAIL_LEN,
        });
    }
    if !email_regex().is_match(email) {
        return Err(ValidationError::InvalidEmail {
            value: email.to_string(),
        });
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if phone.len() > MAX_PHONE_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "phoneNumber",
            max_length: MAX_PHONE_LEN,
        });
    }
    let allowed = |c: char| c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')' | '.');
    if !phone.chars().all(allowed) || !phone.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidPhoneNumber {
            value: phone.to_string(),
        });
    }
    Ok(())
}

/// A key an observation can be matched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey<'a> {
    /// Email address.
    Email(&'a str),
    /// Phone number.
    Phone(&'a str),
}

impl IdentityKey<'_> {
    /// Bytes used for hashing; the prefix keeps the two key spaces apart.
    #[must_use]
    pub fn hash_input(&self) -> Vec<u8> {
        let (tag, value) = match self {
            Self::Email(v) => (b'e', v),
            Self::Phone(v) => (b'p', v),
        };
        let mut out = Vec::with_capacity(value.len() + 2);
        out.push(tag);
        out.push(0);
        out.extend_from_slice(value.as_bytes());
        out
    }
}

/// A validated `(email?, phoneNumber?)` pair with at least one field present.
///
/// # Examples
///
/// ```
/// use idresolve::Observation;
///
/// let obs = Observation::new(Some(" lorraine@hillvalley.edu "), None).unwrap();
/// assert_eq!(obs.email(), Some("lorraine@hillvalley.edu"));
/// assert!(Observation::new(Some(""), None).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    email: Option<String>,
    phone_number: Option<String>,
}

impl Observation {
    /// Normalizes and validates an observation.
    ///
    /// Surrounding whitespace is trimmed and empty strings count as absent.
    ///
    /// # Errors
    /// - `EmptyObservation` when neither field is present
    /// - `InvalidEmail` / `InvalidPhoneNumber` / `FieldTooLong` on malformed fields
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Result<Self, ValidationError> {
        let email = normalize(email);
        let phone_number = normalize(phone_number);

        if email.is_none() && phone_number.is_none() {
            return Err(ValidationError::EmptyObservation);
        }
        if let Some(e) = email.as_deref() {
            validate_email(e)?;
        }
        if let Some(p) = phone_number.as_deref() {
            validate_phone(p)?;
        }

        Ok(Self {
            email,
            phone_number,
        })
    }

    /// Email address, if present.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Phone number, if present.
    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    /// The keys this observation can be matched on.
    #[must_use]
    pub fn identity_keys(&self) -> Vec<IdentityKey<'_>> {
        let mut keys = Vec::with_capacity(2);
        if let Some(e) = self.email() {
            keys.push(IdentityKey::Email(e));
        }
        if let Some(p) = self.phone_number() {
            keys.push(IdentityKey::Phone(p));
        }
        keys
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "email={} phone={}",
            self.email().unwrap_or("-"),
            self.phone_number().unwrap_or("-")
        )
    }
}
