//! Form records for every user-facing write, their field mappings and their
//! validation rule sets.

use serde::Serialize;

use crate::decoder::{DecodeError, FormDecoder, RawForm};
use crate::validator::{
    matches, max_chars, min_chars, not_blank, permitted_value, ValidationState, EMAIL_RX,
};

pub const TITLE_MAX_CHARS: usize = 100;
pub const PASSWORD_MIN_CHARS: usize = 8;
pub const EXPIRY_DAYS: [i64; 3] = [1, 7, 365];
pub const DEFAULT_EXPIRY_DAYS: i64 = 7;

const MSG_BLANK: &str = "This field cannot be blank";
const MSG_EMAIL: &str = "This field must be a valid email address";

pub const MSG_DUPLICATE_EMAIL: &str = "Email address is already in use";
pub const MSG_INVALID_CREDENTIALS: &str = "Email or password is incorrect";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoCreateForm {
    pub title: String,
    pub content: String,
    pub expires: i64,
    pub validation: ValidationState,
}

impl Default for MemoCreateForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            content: String::new(),
            expires: DEFAULT_EXPIRY_DAYS,
            validation: ValidationState::new(),
        }
    }
}

impl MemoCreateForm {
    pub fn validate(&mut self) {
        let v = &mut self.validation;
        v.check_field(not_blank(&self.title), "title", MSG_BLANK);
        v.check_field(
            max_chars(&self.title, TITLE_MAX_CHARS),
            "title",
            "This field cannot be more than 100 characters long",
        );
        v.check_field(not_blank(&self.content), "content", MSG_BLANK);
        v.check_field(
            permitted_value(self.expires, &EXPIRY_DAYS),
            "expires",
            "This field must equal 1, 7 or 365",
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub validation: ValidationState,
}

impl SignupForm {
    pub fn validate(&mut self) {
        let v = &mut self.validation;
        v.check_field(not_blank(&self.name), "name", MSG_BLANK);
        v.check_field(not_blank(&self.email), "email", MSG_BLANK);
        v.check_field(matches(&self.email, &EMAIL_RX), "email", MSG_EMAIL);
        v.check_field(not_blank(&self.password), "password", MSG_BLANK);
        v.check_field(
            min_chars(&self.password, PASSWORD_MIN_CHARS),
            "password",
            "This field must be at least 8 characters long",
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoginForm {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub validation: ValidationState,
}

impl LoginForm {
    pub fn validate(&mut self) {
        let v = &mut self.validation;
        v.check_field(not_blank(&self.email), "email", MSG_BLANK);
        v.check_field(matches(&self.email, &EMAIL_RX), "email", MSG_EMAIL);
        v.check_field(not_blank(&self.password), "password", MSG_BLANK);
    }
}

/// One decoder per form record, built once when the service starts.
#[derive(Debug)]
pub struct FormDecoders {
    memo_create: FormDecoder<MemoCreateForm>,
    signup: FormDecoder<SignupForm>,
    login: FormDecoder<LoginForm>,
}

impl FormDecoders {
    pub fn new() -> Result<Self, DecodeError> {
        Ok(Self {
            memo_create: FormDecoder::builder()
                .field("title", |f: &mut MemoCreateForm, v: String| f.title = v)
                .field("content", |f: &mut MemoCreateForm, v: String| f.content = v)
                .optional("expires", |f: &mut MemoCreateForm, v: i64| f.expires = v)
                .build()?,
            signup: FormDecoder::builder()
                .field("name", |f: &mut SignupForm, v: String| f.name = v)
                .field("email", |f: &mut SignupForm, v: String| f.email = v)
                .field("password", |f: &mut SignupForm, v: String| f.password = v)
                .build()?,
            login: FormDecoder::builder()
                .field("email", |f: &mut LoginForm, v: String| f.email = v)
                .field("password", |f: &mut LoginForm, v: String| f.password = v)
                .build()?,
        })
    }

    pub fn memo_create(&self, form: &RawForm) -> Result<MemoCreateForm, DecodeError> {
        self.memo_create.decode_into(form, MemoCreateForm::default())
    }

    pub fn signup(&self, form: &RawForm) -> Result<SignupForm, DecodeError> {
        self.signup.decode(form)
    }

    pub fn login(&self, form: &RawForm) -> Result<LoginForm, DecodeError> {
        self.login.decode(form)
    }
}
