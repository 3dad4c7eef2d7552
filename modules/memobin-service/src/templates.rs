//! Page templates, compiled once at startup.
//!
//! Layout on disk:
//!
//! ```text
//! <dir>/base.tmpl.html          shared chrome, defines `title` and `main` blocks
//! <dir>/partials/*.tmpl.html    included by the base layout
//! <dir>/pages/<page>.tmpl.html  one body per page, extends the base layout
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use memobin_types::Memo;

const BASE_TEMPLATE: &str = "base.tmpl.html";
const TEMPLATE_SUFFIX: &str = ".tmpl.html";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("the template '{0}' does not exist")]
    UnknownPage(String),

    #[error("failed to read template source: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to walk template directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("template error: {0}")]
    Render(#[from] minijinja::Error),
}

/// Dynamic data handed to every page.
#[derive(Debug, Default, Serialize)]
pub struct TemplateData {
    pub current_year: i32,
    /// Echoed back by every form as the hidden `csrf_token` field.
    pub csrf_token: String,
    pub flash: String,
    pub is_authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<Memo>,
    pub memos: Vec<Memo>,
    /// The submitted form record, including its validation state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<minijinja::Value>,
}

impl TemplateData {
    pub fn with_form<F: Serialize>(mut self, form: &F) -> Self {
        self.form = Some(minijinja::Value::from_serialize(form));
        self
    }
}

/// Page name → composed template.
pub struct TemplateSet {
    env: Environment<'static>,
    pages: BTreeMap<String, String>,
}

impl TemplateSet {
    /// Load and validate every page under `dir`. Any malformed source fails
    /// here rather than at request time.
    pub fn load(dir: &Path) -> Result<Self, TemplateError> {
        let mut sources = Vec::new();
        sources.push((
            BASE_TEMPLATE.to_string(),
            fs::read_to_string(dir.join(BASE_TEMPLATE))?,
        ));
        for sub in ["partials", "pages"] {
            let root = dir.join(sub);
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry?;
                let Some(file_name) = entry.file_name().to_str() else {
                    continue;
                };
                if !entry.file_type().is_file() || !file_name.ends_with(TEMPLATE_SUFFIX) {
                    continue;
                }
                sources.push((
                    format!("{}/{}", sub, file_name),
                    fs::read_to_string(entry.path())?,
                ));
            }
        }
        Self::from_sources(sources)
    }

    /// Build from `(name, source)` pairs named as they would be on disk.
    pub fn from_sources<I>(sources: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env = Environment::new();
        // Pages reach into `form` and `memo` before either is set.
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.add_filter("human_date", human_date_filter);

        let mut pages = BTreeMap::new();
        for (name, source) in sources {
            if let Some(page) = name
                .strip_prefix("pages/")
                .and_then(|n| n.strip_suffix(TEMPLATE_SUFFIX))
            {
                pages.insert(page.to_string(), name.clone());
            }
            env.add_template_owned(name, source)?;
        }

        let set = Self { env, pages };
        // Dry-run every page so missing parents or partials surface now.
        for page in set.pages.keys() {
            set.render(page, &TemplateData::default())?;
            log::debug!("Compiled page template '{}'", page);
        }
        Ok(set)
    }

    /// Render `page` into an owned buffer.
    pub fn render(&self, page: &str, data: &TemplateData) -> Result<String, TemplateError> {
        let name = self
            .pages
            .get(page)
            .ok_or_else(|| TemplateError::UnknownPage(page.to_string()))?;
        let template = self.env.get_template(name)?;
        Ok(template.render(data)?)
    }

    pub fn page_names(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }
}

/// `10 Jan 2025 at 15:03`, always in UTC.
pub fn human_date(ts: DateTime<Utc>) -> String {
    ts.format("%d %b %Y at %H:%M").to_string()
}

fn human_date_filter(value: String) -> Result<String, minijinja::Error> {
    if value.is_empty() {
        return Ok(String::new());
    }
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| human_date(dt.with_timezone(&Utc)))
        .map_err(|e| {
            minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("human_date expects an RFC 3339 timestamp: {}", e),
            )
        })
}
