use crate::document::{AttrFilter, DocumentView, Page, ParserKind};
use crate::link::{is_absolute_url, AbsoluteUrlResolver};
use crate::sanitize::sanitize_file_name;
use crate::session::PageFetcher;
use std::collections::HashMap;
use tracing::instrument;

const VIDEO_MARKER: &str = ".mp4";

/// One fetchable file of a lecture. `file_name` is only set when the link was
/// synthesized by the indexer, other names come from the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub url: String,
    pub file_name: Option<String>,
}

impl Resource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: None,
        }
    }
}

/// Lectures of one weekly topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Week {
    /// Lecture names in page order.
    pub lecture_order: Vec<String>,
    pub lectures: HashMap<String, Vec<Resource>>,
}

/// Everything listed on a course's lecture index page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseIndex {
    /// Topic names in page order. A name can appear twice, `weeks` then holds
    /// the lectures of the last one.
    pub topics: Vec<String>,
    pub weeks: HashMap<String, Week>,
    /// Lectures for which no video could be found.
    pub missing_videos: Vec<String>,
}

impl CourseIndex {
    pub fn resource_count(&self) -> usize {
        self.weeks
            .values()
            .flat_map(|w| w.lectures.values())
            .map(Vec::len)
            .sum()
    }
}

#[derive(Debug)]
struct LectureEntry {
    name: String,
    resources: Vec<Resource>,
    /// No video among the listed resources.
    needs_video: bool,
    /// Detail page that embeds the lecture's video player.
    video_page: Option<String>,
}

#[derive(Debug)]
struct TopicEntry {
    name: String,
    lectures: Vec<LectureEntry>,
}

/// Walks a lecture index page into topics, lectures and their resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentIndexer {
    parser: ParserKind,
}

impl ContentIndexer {
    pub fn new(parser: ParserKind) -> Self {
        Self { parser }
    }

    /// Indexes the lecture page `html` served from `page_url`. Lectures without
    /// a listed video get their detail page fetched through `pages` to find one.
    #[instrument(skip(self, html, pages))]
    pub async fn index<P>(&self, page_url: &str, html: &str, pages: &P) -> CourseIndex
    where
        P: PageFetcher + Sync + ?Sized,
    {
        let entries = self.parse_topics(html);
        let mut resolver = AbsoluteUrlResolver::new(page_url);
        let mut index = CourseIndex::default();

        for topic in entries {
            let mut week = Week::default();
            for mut lecture in topic.lectures {
                if lecture.needs_video {
                    let video_url = match lecture.video_page.take() {
                        Some(video_page) => {
                            let video_page = resolver.resolve(&video_page);
                            self.find_video(&video_page, pages).await
                        }
                        None => None,
                    };
                    match video_url {
                        Some(url) => lecture.resources.push(Resource {
                            url,
                            file_name: Some(sanitize_file_name(&format!(
                                "{}{}",
                                lecture.name, VIDEO_MARKER
                            ))),
                        }),
                        None => {
                            tracing::warn!("Failed to find video for {}", lecture.name);
                            index.missing_videos.push(lecture.name.clone());
                        }
                    }
                }
                week.lecture_order.push(lecture.name.clone());
                week.lectures.insert(lecture.name, lecture.resources);
            }
            index.topics.push(topic.name.clone());
            index.weeks.insert(topic.name, week);
        }
        tracing::debug!(
            "Indexed {} topics, {} resources",
            index.topics.len(),
            index.resource_count()
        );
        index
    }

    fn parse_topics(&self, html: &str) -> Vec<TopicEntry> {
        let page = Page::parse(html, self.parser);
        let headers = page
            .root()
            .find_all("div", AttrFilter::Class("course-item-list-header"));

        let mut topics = Vec::new();
        for header in headers {
            let Some(heading) = header.find_next("h3") else {
                tracing::debug!("Topic header without a title, skipping");
                continue;
            };
            let name = sanitize_file_name(&heading.text_content());
            let lectures = match header.next_sibling_element() {
                Some(list) => list
                    .find_all("li", AttrFilter::Any)
                    .iter()
                    .filter_map(parse_lecture)
                    .collect(),
                None => Vec::new(),
            };
            topics.push(TopicEntry { name, lectures });
        }
        topics
    }

    /// Looks for an mp4 `<source>` on the lecture's detail page. Any failure is
    /// just a missing video.
    async fn find_video<P>(&self, video_page: &str, pages: &P) -> Option<String>
    where
        P: PageFetcher + Sync + ?Sized,
    {
        if !is_absolute_url(video_page) {
            tracing::debug!("Video page {} is not a valid url", video_page);
            return None;
        }
        let body = match pages.fetch_page(video_page).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Error fetching video page {}\nError : {}", video_page, e);
                return None;
            }
        };
        video_source(&body, self.parser)
    }
}

fn parse_lecture<D: DocumentView>(item: &D) -> Option<LectureEntry> {
    let Some(title) = item.find("a", AttrFilter::Any) else {
        tracing::debug!("Lecture item without a link, skipping");
        return None;
    };
    let name = sanitize_file_name(&title.text_content());

    let resources: Vec<Resource> = item
        .find("div", AttrFilter::Class("course-lecture-item-resource"))
        .map(|block| {
            block
                .find_all("a", AttrFilter::Any)
                .iter()
                .filter_map(|a| a.attribute("href"))
                .map(Resource::new)
                .collect()
        })
        .unwrap_or_default();

    let needs_video = !resources.iter().any(|r| r.url.contains(VIDEO_MARKER));
    let video_page = if needs_video {
        item.find("a", AttrFilter::Class("lecture-link"))
            .and_then(|link| link.attribute("data-modal-iframe").map(str::to_string))
    } else {
        None
    };

    Some(LectureEntry {
        name,
        resources,
        needs_video,
        video_page,
    })
}

fn video_source(html: &str, parser: ParserKind) -> Option<String> {
    let page = Page::parse(html, parser);
    let source = page
        .root()
        .find("source", AttrFilter::Equals("type", "video/mp4"))?;
    source.attribute("src").map(str::to_string)
}
