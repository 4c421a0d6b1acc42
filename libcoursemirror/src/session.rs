use crate::document::{AttrFilter, DocumentView, Page, ParserKind};
use crate::errors::{MirrorError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use tracing::instrument;
use url::Url;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Source of html pages, by url.
#[async_trait]
pub trait PageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

/// A page body together with the url it was finally served from.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub body: String,
}

/// Browser-like http session. Cookies set by the site (the login) are kept for
/// every following request.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    parser: ParserKind,
}

impl Session {
    pub fn new(user_agent: &str, parser: ParserKind) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .build()
            .map_err(|e| MirrorError::NetworkError(e.to_string()))?;
        Ok(Self { client, parser })
    }

    /// Sends a GET request and hands back the response once the status line is
    /// known to be a success.
    #[instrument(skip(self))]
    pub async fn open(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;
        check_status(response)
    }

    #[instrument(skip(self))]
    pub async fn get_page(&self, url: &str) -> Result<FetchedPage> {
        read_page(self.open(url).await?).await
    }

    /// Fills in the `form_index`th form of `page` (zero based) and submits it.
    /// Fields already present on the form keep their values unless overridden by
    /// `overrides`.
    #[instrument(skip(self, page, overrides), fields(url = %page.url))]
    pub async fn submit_form(
        &self,
        page: &FetchedPage,
        form_index: usize,
        overrides: &[(&str, &str)],
    ) -> Result<FetchedPage> {
        let mut form = extract_form(page, form_index, self.parser)
            .ok_or_else(|| MirrorError::InvalidHtml(format!("no form #{form_index} on {}", page.url)))?;
        for (name, value) in overrides {
            form.set(name, value);
        }
        tracing::debug!("Submitting form {} {}", form.method, form.action);

        let request = if form.method == Method::GET {
            self.client.get(form.action.clone()).query(&form.fields)
        } else {
            self.client.request(form.method.clone(), form.action.clone()).form(&form.fields)
        };
        let response = request
            .send()
            .await
            .map_err(|e| request_error(form.action.as_str(), e))?;
        read_page(check_status(response)?).await
    }
}

#[async_trait]
impl PageFetcher for Session {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        Ok(self.get_page(url).await?.body)
    }
}

async fn read_page(response: Response) -> Result<FetchedPage> {
    let url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| request_error(url.as_str(), e))?;
    Ok(FetchedPage { url, body })
}

fn check_status(response: Response) -> Result<Response> {
    if !response.status().is_success() {
        tracing::error!(
            "Error status code received : {} |{}|",
            response.status(),
            response.url()
        );
        return Err(MirrorError::ErrorStatusCode {
            status_code: response.status().to_string(),
            url: response.url().to_string(),
        });
    }
    Ok(response)
}

pub(crate) fn request_error(url: &str, e: reqwest::Error) -> MirrorError {
    tracing::error!("Error fetching {}\nError : {}", url, e);
    if e.is_connect() || e.is_timeout() {
        MirrorError::NetworkError(format!("{url} : {e}"))
    } else {
        MirrorError::fetch(url, e)
    }
}

#[derive(Debug, PartialEq)]
struct Form {
    method: Method,
    action: Url,
    fields: Vec<(String, String)>,
}

impl Form {
    fn set(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some(field) => field.1 = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }
}

/// Reads the controls of a form the way a browser would submit them: named
/// inputs with their default values, checked boxes only, no buttons.
fn extract_form(page: &FetchedPage, form_index: usize, parser: ParserKind) -> Option<Form> {
    let doc = Page::parse(&page.body, parser);
    let form = doc
        .root()
        .find_all("form", AttrFilter::Any)
        .into_iter()
        .nth(form_index)?;

    let method = match form.attribute("method").map(|m| m.to_uppercase()) {
        Some(m) if m == "POST" => Method::POST,
        _ => Method::GET,
    };
    let action = match form.attribute("action").map(str::trim) {
        None | Some("") => page.url.clone(),
        Some(a) => page.url.join(a).ok()?,
    };

    let mut fields = Vec::new();
    for input in form.find_all("input", AttrFilter::Any) {
        let Some(name) = input.attribute("name") else {
            continue;
        };
        let kind = input.attribute("type").unwrap_or("text").to_lowercase();
        match kind.as_str() {
            "submit" | "button" | "image" | "reset" | "file" => continue,
            "checkbox" | "radio" if input.attribute("checked").is_none() => continue,
            "checkbox" | "radio" => fields.push((
                name.to_string(),
                input.attribute("value").unwrap_or("on").to_string(),
            )),
            _ => fields.push((
                name.to_string(),
                input.attribute("value").unwrap_or_default().to_string(),
            )),
        }
    }
    for area in form.find_all("textarea", AttrFilter::Any) {
        if let Some(name) = area.attribute("name") {
            fields.push((name.to_string(), area.text_content()));
        }
    }

    Some(Form {
        method,
        action,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            url: Url::parse("http://site/course/auth/login").unwrap(),
            body: body.to_string(),
        }
    }

    #[test]
    fn reads_form_controls() {
        let p = page(
            r#"<form id="search"><input name="q"></form>
            <form method="post" action="/course/auth/submit">
              <input type="hidden" name="token" value="abc">
              <input id="email" name="email">
              <input id="password_login" type="password" name="password">
              <input type="checkbox" name="remember" checked>
              <input type="checkbox" name="spam">
              <input type="submit" name="go" value="Log in">
              <textarea name="note">hi</textarea>
            </form>"#,
        );
        let mut form = extract_form(&p, 1, ParserKind::Document).unwrap();
        assert_eq!(form.method, Method::POST);
        assert_eq!(form.action.as_str(), "http://site/course/auth/submit");
        form.set("email", "me@example.com");
        form.set("password", "secret");
        assert_eq!(
            form.fields,
            vec![
                ("token".to_string(), "abc".to_string()),
                ("email".to_string(), "me@example.com".to_string()),
                ("password".to_string(), "secret".to_string()),
                ("remember".to_string(), "on".to_string()),
                ("note".to_string(), "hi".to_string()),
            ]
        );
    }

    #[test]
    fn form_without_action_posts_back_to_the_page() {
        let p = page(r#"<form><input name="q" value="x"></form>"#);
        let form = extract_form(&p, 0, ParserKind::Document).unwrap();
        assert_eq!(form.method, Method::GET);
        assert_eq!(form.action, p.url);
        assert!(extract_form(&p, 1, ParserKind::Document).is_none());
    }
}
