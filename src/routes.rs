//! Client-side routes and who may open them

use crate::hooks::Viewer;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Lost,
    Found,
    Item(Uuid),
    ReportLost,
    ReportFound,
    Contact,
    Chat,
    Login,
    Register,
    Admin,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    RedirectToLogin,
    Deny,
}

impl Route {
    /// Matches a path; anything unknown is `NotFound`. Query strings,
    /// fragments and a trailing slash are ignored.
    pub fn parse(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Route::Home,
            ["lost"] => Route::Lost,
            ["found"] => Route::Found,
            ["item", id] => Uuid::parse_str(id).map_or(Route::NotFound, Route::Item),
            ["report-lost"] => Route::ReportLost,
            ["report-found"] => Route::ReportFound,
            ["contact"] => Route::Contact,
            ["chat"] => Route::Chat,
            ["login"] => Route::Login,
            ["register"] => Route::Register,
            ["admin"] => Route::Admin,
            _ => Route::NotFound,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Lost => "/lost".to_string(),
            Route::Found => "/found".to_string(),
            Route::Item(id) => format!("/item/{}", id),
            Route::ReportLost => "/report-lost".to_string(),
            Route::ReportFound => "/report-found".to_string(),
            Route::Contact => "/contact".to_string(),
            Route::Chat => "/chat".to_string(),
            Route::Login => "/login".to_string(),
            Route::Register => "/register".to_string(),
            Route::Admin => "/admin".to_string(),
            Route::NotFound => "/404".to_string(),
        }
    }

    /// UI gate only. The row policies decide what the backend allows.
    pub fn access(&self, viewer: &Viewer) -> Access {
        match self {
            Route::ReportLost | Route::ReportFound | Route::Chat if !viewer.is_authenticated() => {
                Access::RedirectToLogin
            }
            Route::Admin if !viewer.is_authenticated() => Access::RedirectToLogin,
            Route::Admin if !viewer.is_admin() => Access::Deny,
            _ => Access::Allow,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
