//! Page rendering helpers shared by every HTML handler.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use chrono::{Datelike, Utc};

use crate::errors::AppError;
use crate::routes::AppState;
use crate::session::{Session, FLASH_KEY};
use crate::templates::TemplateData;

impl AppState {
    /// Base data for a page: the year, the session's CSRF token, the one-shot
    /// flash and whether the visitor is logged in as a user that still exists.
    pub fn new_template_data(&self, session: &Session) -> Result<TemplateData, AppError> {
        Ok(TemplateData {
            current_year: Utc::now().year(),
            csrf_token: session.csrf_token()?,
            flash: session.pop_string(FLASH_KEY)?,
            is_authenticated: self.is_authenticated(session)?,
            ..Default::default()
        })
    }

    pub fn is_authenticated(&self, session: &Session) -> Result<bool, AppError> {
        match session.authenticated_user_id()? {
            Some(id) => Ok(self.db.user_exists(id)?),
            None => Ok(false),
        }
    }

    /// Render `page` fully before anything is written, so a template failure
    /// still yields a clean 500.
    pub fn render(
        &self,
        status: StatusCode,
        page: &str,
        data: &TemplateData,
    ) -> Result<Response, AppError> {
        let body = self.templates.render(page, data)?;
        Ok((status, Html(body)).into_response())
    }
}
