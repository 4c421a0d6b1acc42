use std::fmt::Formatter;
use std::path::PathBuf;

pub mod document;
pub mod download;
mod errors;
pub mod index;
pub mod link;
mod mirror;
pub mod sanitize;
pub mod session;

pub use document::ParserKind;
pub use download::Decision;
pub use errors::{MirrorError, Result};
pub use index::{ContentIndexer, CourseIndex, Resource, Week};
pub use link::AbsoluteUrlResolver;
pub use mirror::{course_name_from_url, mirror_courses, CourseMirror, CourseUrls, MirrorState, Stage};
pub use sanitize::sanitize_file_name;
pub use session::{Session, DEFAULT_USER_AGENT};

pub const DEFAULT_SITE_URL: &str = "http://class.coursera.org";

#[derive(Debug, Clone)]
pub struct MirrorRule {
    /// Scheme and host every course url is built from.
    pub site_url: String,
    /// Each course gets its own directory in here.
    pub dest_dir: PathBuf,
    /// Quizzes and homework. Opening a quiz can count as an attempt on the site.
    pub download_quizzes: bool,
    pub parser: ParserKind,
    pub user_agent: String,
}

impl Default for MirrorRule {
    fn default() -> Self {
        Self {
            site_url: DEFAULT_SITE_URL.to_string(),
            dest_dir: PathBuf::from("."),
            download_quizzes: false,
            parser: ParserKind::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

#[derive(Debug)]
pub enum Update {
    StateUpdate(StateChange),
    MessageUpdate(Message),
    ProgressUpdate(Progress),
}

#[derive(Debug)]
pub struct StateChange {
    pub course: String,
    pub state: MirrorState,
}

#[derive(Debug)]
pub struct Message {
    pub course: String,
    pub content: String,
    pub resource_name: String,
    pub is_error: bool,
}

#[derive(Debug)]
pub struct Progress {
    pub course: String,
    pub resource_name: String,
    pub bytes_written: u64,
    /// The file was already on disk and left alone.
    pub skipped: bool,
}

/// What happened while mirroring one course.
#[derive(Debug, Default)]
pub struct MirrorReport {
    pub course: String,
    pub course_dir: PathBuf,
    pub downloaded: usize,
    pub skipped: usize,
    /// Items that could not be mirrored. None of these stopped the course.
    pub failures: Vec<MirrorError>,
    /// Lectures that ended up without a video.
    pub missing_videos: Vec<String>,
}

impl MirrorReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
