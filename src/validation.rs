//! Form validation for the report and auth forms
//!
//! Everything here is pure: a form is checked against `today` and yields a
//! map of field name to message. Submission goes through [`FormState`], which
//! refuses to hand the form out while any error remains.

use crate::error::{Error, Result};
use crate::models::{Category, ItemType, Location, NewItem};
use bytes::Bytes;
use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

/// Largest accepted image, 5 MiB.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const MAX_TITLE_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 1000;
const MAX_NAME_LEN: usize = 100;
const MIN_PASSWORD_LEN: usize = 6;

fn phone_regex() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| {
        Regex::new(r"^(\+62|62|0)8[1-9][0-9]{6,10}$").expect("phone pattern is valid")
    })
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"))
}

/// Indonesian mobile number, whitespace ignored.
pub fn is_valid_phone(phone: &str) -> bool {
    let compact: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    phone_regex().is_match(&compact)
}

pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email.trim())
}

/// Field name to message, ordered by field name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `message` unless the field already has one.
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn clear(&mut self, field: &str) {
        self.0.remove(field);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", field, message)?;
            first = false;
        }
        Ok(())
    }
}

fn require(errors: &mut FieldErrors, field: &'static str, value: &str, label: &str) -> bool {
    if value.trim().is_empty() {
        errors.add(field, format!("{} is required", label));
        false
    } else {
        true
    }
}

fn max_len(errors: &mut FieldErrors, field: &'static str, value: &str, label: &str, max: usize) {
    if value.trim().chars().count() > max {
        errors.add(field, format!("{} must be at most {} characters", label, max));
    }
}

/// A form that can be checked without I/O.
pub trait Form {
    fn validate(&self, today: NaiveDate) -> FieldErrors;
}

/// Report-lost / report-found form
#[derive(Debug, Clone, PartialEq)]
pub struct ReportForm {
    pub kind: ItemType,
    pub title: String,
    pub description: String,
    pub category: Option<Category>,
    pub location: Option<Location>,
    pub date: Option<NaiveDate>,
    pub contact_name: String,
    pub contact_phone: String,
    pub contact_email: String,
}

impl ReportForm {
    pub fn new(kind: ItemType) -> Self {
        Self {
            kind,
            title: String::new(),
            description: String::new(),
            category: None,
            location: None,
            date: None,
            contact_name: String::new(),
            contact_phone: String::new(),
            contact_email: String::new(),
        }
    }

    /// Builds the insert payload; fails with the field errors when invalid.
    pub fn to_new_item(
        &self,
        today: NaiveDate,
        image_url: Option<String>,
        user_id: Option<Uuid>,
    ) -> Result<NewItem> {
        self.validate(today).into_result()?;
        let (category, location, date) = match (self.category, self.location, self.date) {
            (Some(category), Some(location), Some(date)) => (category, location, date),
            _ => return Err(Error::Validation(self.validate(today))),
        };
        let email = self.contact_email.trim();
        Ok(NewItem {
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            category,
            kind: self.kind,
            location,
            date,
            image_url,
            contact_name: self.contact_name.trim().to_string(),
            contact_phone: self.contact_phone.split_whitespace().collect(),
            contact_email: (!email.is_empty()).then(|| email.to_string()),
            user_id,
        })
    }
}

impl Form for ReportForm {
    fn validate(&self, today: NaiveDate) -> FieldErrors {
        let mut errors = FieldErrors::new();

        if require(&mut errors, "title", &self.title, "Title") {
            max_len(&mut errors, "title", &self.title, "Title", MAX_TITLE_LEN);
        }
        if self.category.is_none() {
            errors.add("category", "Choose a category");
        }
        if self.location.is_none() {
            errors.add("location", "Choose a location");
        }
        match self.date {
            None => errors.add("date", "Date is required"),
            Some(date) if date > today => errors.add("date", "Date cannot be in the future"),
            Some(_) => {}
        }
        if require(&mut errors, "description", &self.description, "Description") {
            max_len(
                &mut errors,
                "description",
                &self.description,
                "Description",
                MAX_DESCRIPTION_LEN,
            );
        }
        if require(&mut errors, "contact_name", &self.contact_name, "Contact name") {
            max_len(
                &mut errors,
                "contact_name",
                &self.contact_name,
                "Contact name",
                MAX_NAME_LEN,
            );
        }
        if require(&mut errors, "contact_phone", &self.contact_phone, "Phone number")
            && !is_valid_phone(&self.contact_phone)
        {
            errors.add(
                "contact_phone",
                "Enter a valid Indonesian mobile number, e.g. 081234567890",
            );
        }
        if !self.contact_email.trim().is_empty() && !is_valid_email(&self.contact_email) {
            errors.add("contact_email", "Enter a valid email address");
        }

        errors
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl Form for LoginForm {
    fn validate(&self, _today: NaiveDate) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if require(&mut errors, "email", &self.email, "Email") && !is_valid_email(&self.email) {
            errors.add("email", "Enter a valid email address");
        }
        require(&mut errors, "password", &self.password, "Password");
        errors
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterForm {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Form for RegisterForm {
    fn validate(&self, _today: NaiveDate) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if require(&mut errors, "full_name", &self.full_name, "Full name") {
            max_len(&mut errors, "full_name", &self.full_name, "Full name", MAX_NAME_LEN);
        }
        if require(&mut errors, "email", &self.email, "Email") && !is_valid_email(&self.email) {
            errors.add("email", "Enter a valid email address");
        }
        if require(&mut errors, "password", &self.password, "Password")
            && self.password.chars().count() < MIN_PASSWORD_LEN
        {
            errors.add(
                "password",
                format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
            );
        }
        if self.confirm_password != self.password {
            errors.add("confirm_password", "Passwords do not match");
        }
        errors
    }
}

/// A form plus the errors currently shown next to its fields.
#[derive(Debug, Clone)]
pub struct FormState<F: Form> {
    form: F,
    errors: FieldErrors,
}

impl<F: Form> FormState<F> {
    pub fn new(form: F) -> Self {
        Self {
            form,
            errors: FieldErrors::new(),
        }
    }

    pub fn form(&self) -> &F {
        &self.form
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// Applies an edit to one field and clears that field's error.
    pub fn edit(&mut self, field: &'static str, change: impl FnOnce(&mut F)) {
        change(&mut self.form);
        self.errors.clear(field);
    }

    /// Re-runs every check; the form is only handed out when clean.
    pub fn submit(&mut self, today: NaiveDate) -> Result<&F> {
        self.errors = self.form.validate(today);
        if self.errors.is_empty() {
            Ok(&self.form)
        } else {
            Err(Error::Validation(self.errors.clone()))
        }
    }
}

/// A picked image, checked against [`MAX_IMAGE_BYTES`] before upload
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl ImageUpload {
    pub fn new(file_name: &str, content_type: &str, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn check_size(&self) -> Result<()> {
        check_image_size(self.size())
    }

    /// Lowercased extension from the file name, falling back to the MIME subtype.
    pub fn extension(&self) -> String {
        let from_name = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
        // `svg+xml` -> `svg`, `jpeg; charset=..` -> `jpeg`
        let from_mime = self
            .content_type
            .split_once('/')
            .and_then(|(_, subtype)| subtype.split(|c: char| !c.is_ascii_alphanumeric()).next())
            .filter(|subtype| !subtype.is_empty());
        from_name
            .or(from_mime)
            .unwrap_or("bin")
            .to_ascii_lowercase()
    }
}

pub fn check_image_size(size: usize) -> Result<()> {
    if size > MAX_IMAGE_BYTES {
        Err(Error::FileTooLarge {
            size,
            limit: MAX_IMAGE_BYTES,
        })
    } else {
        Ok(())
    }
}
