use crate::document::{AttrFilter, DocumentView, Page, ParserKind};
use crate::download::{download_resource, retrieve, write_page, Decision, Downloaded};
use crate::errors::{MirrorError, Result};
use crate::index::{ContentIndexer, CourseIndex};
use crate::link::{is_absolute_url, AbsoluteUrlResolver};
use crate::sanitize::sanitize_file_name;
use crate::session::Session;
use crate::{
    Credentials, Message, MirrorReport, MirrorRule, Progress, StateChange, Update,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc::Sender;
use tracing::instrument;
use url::Url;

const LOGIN_FAILED_MARKER: &str = "Login Failed";
const QUIZ_TYPES: [&str; 2] = ["quiz", "homework"];
const ASSIGNMENTS_DIR: &str = "assignments";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pages,
    Wiki,
    Assignments,
    Quizzes,
    LectureTree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
    Indexing,
    Downloading(Stage),
    Done,
    Failed,
}

/// Course name from a course url, e.g. `algo2012-p2` for
/// `http://class.coursera.org/algo2012-p2/lecture/index`.
pub fn course_name_from_url(url: &str) -> Option<String> {
    url.split('/')
        .nth(3)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// The fixed pages of one course.
#[derive(Debug, Clone)]
pub struct CourseUrls {
    root: String,
    course: String,
}

impl CourseUrls {
    pub fn new(site_url: &str, course: &str) -> Self {
        Self {
            root: site_url.trim_end_matches('/').to_string(),
            course: course.to_string(),
        }
    }

    pub fn home(&self) -> String {
        format!("{}/{}/class/index", self.root, self.course)
    }

    pub fn lectures(&self) -> String {
        format!("{}/{}/lecture/index", self.root, self.course)
    }

    pub fn login(&self) -> String {
        format!(
            "{}/{}/auth/auth_redirector?type=login&subtype=normal",
            self.root, self.course
        )
    }

    pub fn quizzes(&self, quiz_type: &str) -> String {
        format!("{}/{}/quiz/index?quiz_type={}", self.root, self.course, quiz_type)
    }

    pub fn assignments(&self) -> String {
        format!("{}/{}/assignment/index", self.root, self.course)
    }
}

/// Mirrors courses of the site into `rule.dest_dir`, one request at a time.
pub struct CourseMirror {
    rule: MirrorRule,
    credentials: Credentials,
    session: Session,
    indexer: ContentIndexer,
    update_tx: Option<Sender<Update>>,
    state: MirrorState,
    course: String,
}

impl CourseMirror {
    pub fn new(
        rule: MirrorRule,
        credentials: Credentials,
        update_tx: Option<Sender<Update>>,
    ) -> Result<Self> {
        let session = Session::new(&rule.user_agent, rule.parser)?;
        Ok(Self {
            indexer: ContentIndexer::new(rule.parser),
            rule,
            credentials,
            session,
            update_tx,
            state: MirrorState::LoggedOut,
            course: String::new(),
        })
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    /// Mirrors a single course. Only failures that end the course (a rejected
    /// login, an unusable destination) come back as `Err`, everything else is
    /// collected in the report.
    #[instrument(skip(self), fields(user = %self.credentials.username))]
    pub async fn mirror(&mut self, course: &str) -> Result<MirrorReport> {
        self.course = course.to_string();
        let result = self.run(course).await;
        match &result {
            Ok(_) => self.enter(MirrorState::Done).await,
            Err(e) => {
                tracing::error!("Mirroring {} failed\nError : {}", course, e);
                self.enter(MirrorState::Failed).await;
            }
        }
        result
    }

    async fn run(&mut self, course: &str) -> Result<MirrorReport> {
        let urls = CourseUrls::new(&self.rule.site_url, course);
        self.login(&urls).await?;

        let course_dir = self.rule.dest_dir.join(course);
        fs::create_dir_all(&course_dir).await.map_err(|e| {
            tracing::error!("Failed to create course directory\nError : {}", e);
            MirrorError::file_op(&course_dir, &e)
        })?;
        tracing::info!("{} will be downloaded to {}", course, course_dir.display());
        let mut report = MirrorReport {
            course: course.to_string(),
            course_dir: course_dir.clone(),
            ..Default::default()
        };

        self.enter(MirrorState::Indexing).await;
        let index = self.index_course(&urls, &mut report).await;

        self.enter(MirrorState::Downloading(Stage::Pages)).await;
        for (url, name) in [(urls.home(), "index.html"), (urls.lectures(), "lectures.html")] {
            let result = download_resource(&self.session, &url, &course_dir, Some(name)).await;
            self.record(&mut report, &url, result).await;
        }

        self.enter(MirrorState::Downloading(Stage::Wiki)).await;
        if let Err(e) = self.download_wiki_pages(&urls, &course_dir, &mut report).await {
            self.fail(&mut report, "wiki pages", e).await;
        }

        self.enter(MirrorState::Downloading(Stage::Assignments)).await;
        if let Err(e) = self
            .download_assignments(&urls, &course_dir, &mut report)
            .await
        {
            self.fail(&mut report, "assignments", e).await;
        }

        if self.rule.download_quizzes {
            self.enter(MirrorState::Downloading(Stage::Quizzes)).await;
            for quiz_type in QUIZ_TYPES {
                tracing::info!("Downloading the '{}' quizzes", quiz_type);
                if let Err(e) = self
                    .download_quizzes(&urls, quiz_type, &course_dir, &mut report)
                    .await
                {
                    self.fail(&mut report, quiz_type, e).await;
                }
            }
        }

        self.enter(MirrorState::Downloading(Stage::LectureTree)).await;
        self.download_lecture_tree(&urls, &index, &course_dir, &mut report)
            .await;

        tracing::info!(
            "Finished {}: {} downloaded, {} skipped, {} failed",
            course,
            report.downloaded,
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    async fn login(&mut self, urls: &CourseUrls) -> Result<()> {
        self.enter(MirrorState::LoggingIn).await;
        tracing::info!("Authenticating as {}...", self.credentials.username);

        let login_url = urls.login();
        let page = self.session.get_page(&login_url).await?;
        if has_password_field(&page.body, self.rule.parser) {
            let overrides = [
                ("email", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ];
            let result = match self.session.submit_form(&page, 0, &overrides).await {
                Err(MirrorError::InvalidHtml(_)) => {
                    return Err(MirrorError::LoginFormMissing(login_url))
                }
                other => other?,
            };
            if login_failed(&result.body, self.rule.parser) {
                return Err(MirrorError::AuthenticationFailed {
                    username: self.credentials.username.clone(),
                });
            }
        } else {
            tracing::info!("Already logged in");
        }

        self.enter(MirrorState::LoggedIn).await;
        Ok(())
    }

    async fn index_course(&self, urls: &CourseUrls, report: &mut MirrorReport) -> CourseIndex {
        let lectures_url = urls.lectures();
        tracing::info!("Collecting downloadable content from {}", lectures_url);
        let page = match self.session.get_page(&lectures_url).await {
            Ok(page) => page,
            Err(e) => {
                self.fail(report, "lecture index", e).await;
                return CourseIndex::default();
            }
        };
        let index = self
            .indexer
            .index(&lectures_url, &page.body, &self.session)
            .await;
        for lecture in &index.missing_videos {
            self.message(
                lecture,
                MirrorError::MissingVideo(lecture.clone()).to_string(),
                false,
            )
            .await;
        }
        report.missing_videos.extend(index.missing_videos.iter().cloned());
        index
    }

    async fn download_wiki_pages(
        &self,
        urls: &CourseUrls,
        course_dir: &Path,
        report: &mut MirrorReport,
    ) -> Result<()> {
        let home_url = urls.home();
        let home = self.session.get_page(&home_url).await?;
        let pages = wiki_pages(&home.body, &home_url, self.rule.parser);
        tracing::debug!("Found {} wiki pages", pages.len());

        for (url, file_name) in pages {
            let result = download_resource(&self.session, &url, course_dir, Some(&file_name)).await;
            self.record(report, &url, result).await;
        }
        Ok(())
    }

    async fn download_assignments(
        &self,
        urls: &CourseUrls,
        course_dir: &Path,
        report: &mut MirrorReport,
    ) -> Result<()> {
        let listing_url = urls.assignments();
        let listing = self.session.get_page(&listing_url).await?;
        let items = listed_items(&listing.body, &listing_url, self.rule.parser);
        let Some(dir) = items_dir(course_dir, ASSIGNMENTS_DIR, items.len()).await? else {
            return Ok(());
        };

        for (position, (url, title)) in items.iter().enumerate() {
            let path = dir.join(listed_file_name(position + 1, title));
            if fs::try_exists(&path).await.unwrap_or(false) {
                self.skipped(report, &path).await;
                continue;
            }
            let result = retrieve(&self.session, url, &path)
                .await
                .map(|bytes_written| fetched(path.clone(), bytes_written));
            self.record(report, url, result).await;
        }
        Ok(())
    }

    /// Quizzes that first need to be started show a start form; that form is
    /// submitted and its answer saved instead of the landing page.
    async fn download_quizzes(
        &self,
        urls: &CourseUrls,
        quiz_type: &str,
        course_dir: &Path,
        report: &mut MirrorReport,
    ) -> Result<()> {
        let listing_url = urls.quizzes(quiz_type);
        let listing = self.session.get_page(&listing_url).await?;
        let items: Vec<(String, String)> = listed_items(&listing.body, &listing_url, self.rule.parser)
            .into_iter()
            .map(|(url, title)| (url.replace("/start?", "/attempt?"), title))
            .collect();
        let Some(dir) = items_dir(course_dir, quiz_type, items.len()).await? else {
            return Ok(());
        };

        for (position, (url, title)) in items.iter().enumerate() {
            let path = dir.join(listed_file_name(position + 1, title));
            if fs::try_exists(&path).await.unwrap_or(false) {
                self.skipped(report, &path).await;
                continue;
            }
            let result = self.download_quiz(url, &path).await;
            self.record(report, url, result).await;
        }
        Ok(())
    }

    async fn download_quiz(&self, url: &str, path: &Path) -> Result<Downloaded> {
        let quiz = self.session.get_page(url).await?;
        let body = if has_start_form(&quiz.body, self.rule.parser) {
            tracing::info!("Starting and downloading quiz {}", url);
            self.session.submit_form(&quiz, 0, &[]).await?.body
        } else {
            tracing::info!("Downloading quiz {}", url);
            quiz.body
        };
        write_page(path, &body).await?;
        Ok(fetched(path.to_path_buf(), body.len() as u64))
    }

    async fn download_lecture_tree(
        &self,
        urls: &CourseUrls,
        index: &CourseIndex,
        course_dir: &Path,
        report: &mut MirrorReport,
    ) {
        let mut resolver = AbsoluteUrlResolver::new(&urls.lectures());

        for (j, topic) in index.topics.iter().enumerate() {
            let Some(week) = index.weeks.get(topic) else {
                continue;
            };
            let week_dir = course_dir.join(numbered(j + 1, topic));
            if let Err(e) = fs::create_dir_all(&week_dir).await {
                self.fail(report, topic, MirrorError::file_op(&week_dir, &e)).await;
                continue;
            }
            tracing::info!("{}", topic);

            for (i, lecture) in week.lecture_order.iter().enumerate() {
                let Some(resources) = week.lectures.get(lecture) else {
                    continue;
                };
                let lecture_dir = week_dir.join(numbered(i + 1, lecture));
                if let Err(e) = fs::create_dir_all(&lecture_dir).await {
                    self.fail(report, lecture, MirrorError::file_op(&lecture_dir, &e))
                        .await;
                    continue;
                }
                tracing::info!("Resources for {}", lecture);

                for resource in resources {
                    let url = if is_absolute_url(&resource.url) {
                        resource.url.clone()
                    } else {
                        let resolved = resolver.resolve(&resource.url);
                        if !is_absolute_url(&resolved) {
                            tracing::warn!("{} is not a valid url", resolved);
                            self.fail(report, lecture, MirrorError::LinkResolution(resolved))
                                .await;
                            continue;
                        }
                        resolved
                    };
                    let result = download_resource(
                        &self.session,
                        &url,
                        &lecture_dir,
                        resource.file_name.as_deref(),
                    )
                    .await;
                    self.record(report, &url, result).await;
                }
            }
        }
    }

    async fn record(&self, report: &mut MirrorReport, url: &str, result: Result<Downloaded>) {
        match result {
            Ok(downloaded) => {
                let skipped = downloaded.decision == Decision::Skip;
                if skipped {
                    report.skipped += 1;
                } else {
                    report.downloaded += 1;
                }
                self.send(Update::ProgressUpdate(Progress {
                    course: self.course.clone(),
                    resource_name: downloaded.path.to_string_lossy().to_string(),
                    bytes_written: downloaded.bytes_written,
                    skipped,
                }))
                .await;
            }
            Err(e) => self.fail(report, url, e).await,
        }
    }

    async fn skipped(&self, report: &mut MirrorReport, path: &Path) {
        tracing::debug!("{} already exists, skipping", path.display());
        self.record(
            report,
            "",
            Ok(Downloaded {
                path: path.to_path_buf(),
                decision: Decision::Skip,
                bytes_written: 0,
            }),
        )
        .await;
    }

    async fn fail(&self, report: &mut MirrorReport, what: &str, error: MirrorError) {
        tracing::error!("Failed {}\nError : {}", what, error);
        self.message(what, error.to_string(), true).await;
        report.failures.push(error);
    }

    async fn message(&self, resource_name: &str, content: String, is_error: bool) {
        self.send(Update::MessageUpdate(Message {
            course: self.course.clone(),
            content,
            resource_name: resource_name.to_string(),
            is_error,
        }))
        .await;
    }

    async fn enter(&mut self, state: MirrorState) {
        tracing::debug!("{} : {:?} -> {:?}", self.course, self.state, state);
        self.state = state;
        self.send(Update::StateUpdate(StateChange {
            course: self.course.clone(),
            state,
        }))
        .await;
    }

    async fn send(&self, update: Update) {
        if let Some(tx) = &self.update_tx {
            if tx.send(update).await.is_err() {
                tracing::debug!("Update receiver dropped");
            }
        }
    }
}

/// Mirrors `courses` one after the other with a single session. A failed
/// course doesn't stop the ones after it.
pub async fn mirror_courses(
    rule: MirrorRule,
    credentials: Credentials,
    courses: &[String],
    update_tx: Option<Sender<Update>>,
) -> Result<Vec<(String, Result<MirrorReport>)>> {
    let mut mirror = CourseMirror::new(rule, credentials, update_tx)?;
    let mut results = Vec::with_capacity(courses.len());
    for course in courses {
        let result = mirror.mirror(course).await;
        results.push((course.clone(), result));
    }
    Ok(results)
}

fn fetched(path: PathBuf, bytes_written: u64) -> Downloaded {
    Downloaded {
        path,
        decision: Decision::Fetch,
        bytes_written,
    }
}

/// Two digit position prefix so that a plain sort keeps the site's order.
fn numbered(position: usize, name: &str) -> String {
    sanitize_file_name(&format!("{:02} - {}", position, name))
}

fn listed_file_name(position: usize, title: &str) -> String {
    sanitize_file_name(&format!("{}.html", numbered(position, &sanitize_file_name(title))))
}

/// Creates `course_dir/name` unless there is nothing to put in it.
async fn items_dir(course_dir: &Path, name: &str, count: usize) -> Result<Option<PathBuf>> {
    if count == 0 {
        tracing::debug!("Nothing listed for {}", name);
        return Ok(None);
    }
    let dir = course_dir.join(name);
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| MirrorError::file_op(&dir, &e))?;
    Ok(Some(dir))
}

fn has_password_field(html: &str, parser: ParserKind) -> bool {
    Page::parse(html, parser)
        .root()
        .find("input", AttrFilter::Equals("id", "password_login"))
        .is_some()
}

fn login_failed(html: &str, parser: ParserKind) -> bool {
    Page::parse(html, parser)
        .title()
        .map_or(false, |title| title.contains(LOGIN_FAILED_MARKER))
}

fn has_start_form(html: &str, parser: ParserKind) -> bool {
    Page::parse(html, parser)
        .root()
        .find("form", AttrFilter::Class("course-quiz-start-form"))
        .is_some()
}

/// `(url, title)` of every entry of an assignment or quiz listing, in page order.
fn listed_items(html: &str, listing_url: &str, parser: ParserKind) -> Vec<(String, String)> {
    let page = Page::parse(html, parser);
    let Some(list) = page
        .root()
        .find("div", AttrFilter::Class("course-item-list"))
    else {
        return Vec::new();
    };
    let mut resolver = AbsoluteUrlResolver::new(listing_url);
    let hrefs = list
        .find_all("a", AttrFilter::Class("btn-primary"))
        .into_iter()
        .filter_map(|a| a.attribute("href").map(|href| resolver.resolve(href)))
        .collect::<Vec<_>>();
    let titles = list
        .find_all("h4", AttrFilter::Any)
        .iter()
        .map(|h| h.text_content().trim().to_string())
        .collect::<Vec<_>>();
    hrefs.into_iter().zip(titles).collect()
}

/// `(url, file name)` of the wiki pages linked from the course navigation.
fn wiki_pages(html: &str, home_url: &str, parser: ParserKind) -> Vec<(String, String)> {
    let page = Page::parse(html, parser);
    let Some(nav) = page
        .root()
        .find("ul", AttrFilter::Class("course-navbar-list"))
    else {
        return Vec::new();
    };
    let mut resolver = AbsoluteUrlResolver::new(home_url);
    let links = nav.find_all("a", AttrFilter::Any);
    let pages = links
        .iter()
        .filter_map(|a| a.attribute("href"))
        .filter(|href| href.contains("page="))
        .filter_map(|href| {
            let url = resolver.resolve(href);
            let page_name = Url::parse(&url)
                .ok()?
                .query_pairs()
                .find(|(key, _)| key == "page")
                .map(|(_, value)| value.into_owned())?;
            let mut file_name = page_name;
            if !file_name.ends_with("html") {
                file_name.push_str(".html");
            }
            let file_name = sanitize_file_name(&file_name);
            if file_name.is_empty() || file_name == ".html" {
                tracing::debug!("No usable page name in {}", url);
                return None;
            }
            Some((url, file_name))
        })
        .collect();
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Resource, Week};
    use std::collections::HashMap;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lecture_tree_skips_entries_missing_from_the_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/c/files/notes.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"notes".to_vec()))
            .mount(&server)
            .await;
        let dest = TempDir::new().unwrap();
        let rule = MirrorRule {
            site_url: server.uri(),
            dest_dir: dest.path().to_path_buf(),
            ..Default::default()
        };
        let credentials = Credentials {
            username: "u".into(),
            password: "p".into(),
        };
        let mirror = CourseMirror::new(rule, credentials, None).unwrap();

        let index = CourseIndex {
            topics: vec!["Ghost".into(), "Real".into()],
            weeks: HashMap::from([(
                "Real".to_string(),
                Week {
                    lecture_order: vec!["Missing".into(), "Notes".into()],
                    lectures: HashMap::from([(
                        "Notes".to_string(),
                        vec![Resource::new("../files/notes.pdf"), Resource::new("../../../up.pdf")],
                    )]),
                },
            )]),
            missing_videos: Vec::new(),
        };
        let mut report = MirrorReport::default();
        let urls = CourseUrls::new(&server.uri(), "c");
        mirror
            .download_lecture_tree(&urls, &index, dest.path(), &mut report)
            .await;

        let mut entries: Vec<String> = std::fs::read_dir(dest.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["02 - Real"]);
        let lecture_dir = dest.path().join("02 - Real").join("02 - Notes");
        assert_eq!(std::fs::read(lecture_dir.join("notes.pdf")).unwrap(), b"notes");
        assert!(!dest.path().join("02 - Real").join("01 - Missing").exists());
        assert_eq!(report.downloaded, 1);
        // "../../../up.pdf" only climbs one level and lands on a missing file
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn course_urls() {
        let urls = CourseUrls::new("http://class.coursera.org/", "algo-003");
        assert_eq!(urls.home(), "http://class.coursera.org/algo-003/class/index");
        assert_eq!(
            urls.lectures(),
            "http://class.coursera.org/algo-003/lecture/index"
        );
        assert_eq!(
            urls.quizzes("homework"),
            "http://class.coursera.org/algo-003/quiz/index?quiz_type=homework"
        );
        assert_eq!(
            course_name_from_url(&urls.lectures()).as_deref(),
            Some("algo-003")
        );
        assert_eq!(course_name_from_url("http://class.coursera.org/"), None);
    }

    #[test]
    fn numbered_names() {
        assert_eq!(numbered(1, "Week 1"), "01 - Week 1");
        assert_eq!(numbered(12, "x"), "12 - x");
        assert_eq!(numbered(123, "x"), "123 - x");
        assert_eq!(listed_file_name(3, "Problem Set: #3?"), "03 - Problem Set 3.html");
    }

    #[test]
    fn listing_pairs_buttons_with_titles() {
        let html = r#"<div class="course-item-list">
            <div><h4>Quiz <b>One</b></h4><a class="btn btn-primary" href="/c/quiz/start?quiz_id=1">Start</a></div>
            <div><h4>Quiz Two</h4><a class="btn" href="/c/quiz/help">Help</a>
                 <a class="btn-primary" href="http://site/c/quiz/attempt?quiz_id=2">Go</a></div>
        </div>"#;
        let items = listed_items(html, "http://site/c/quiz/index?quiz_type=quiz", ParserKind::Document);
        assert_eq!(
            items,
            vec![
                ("http://site/c/quiz/start?quiz_id=1".to_string(), "Quiz One".to_string()),
                ("http://site/c/quiz/attempt?quiz_id=2".to_string(), "Quiz Two".to_string()),
            ]
        );
        assert!(listed_items("<p>nothing</p>", "http://site/", ParserKind::Document).is_empty());
    }

    #[test]
    fn wiki_links_use_the_page_parameter() {
        let html = r#"<ul class="course-navbar-list">
            <li><a href="/c/class/index">Home</a></li>
            <li><a href="/c/wiki/view?page=syllabus">Syllabus</a></li>
            <li><a href="http://site/c/wiki/view?page=faq.html">FAQ</a></li>
            <li><a href="/c/wiki/view?page=">Empty</a></li>
        </ul>"#;
        let pages = wiki_pages(html, "http://site/c/class/index", ParserKind::Document);
        assert_eq!(
            pages,
            vec![
                ("http://site/c/wiki/view?page=syllabus".to_string(), "syllabus.html".to_string()),
                ("http://site/c/wiki/view?page=faq.html".to_string(), "faq.html".to_string()),
            ]
        );
    }

    #[test]
    fn login_page_detection() {
        let form = r#"<form><input id="email"><input id="password_login" type="password"></form>"#;
        assert!(has_password_field(form, ParserKind::Document));
        assert!(!has_password_field("<p>Welcome back</p>", ParserKind::Document));
        assert!(login_failed(
            "<html><head><title>Coursera | Login Failed</title></head></html>",
            ParserKind::Document
        ));
        assert!(!login_failed("<title>Course home</title>", ParserKind::Document));
    }
}
