use scraper::{ElementRef, Html};
use std::fmt::Formatter;
use std::str::FromStr;

/// How a fetched page is handed to the html parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserKind {
    /// Full document parsing, missing `<html>`/`<body>` are synthesized.
    #[default]
    Document,
    /// Parse the body as a fragment. More lenient with pages that are cut short.
    Fragment,
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" | "html5ever" => Ok(ParserKind::Document),
            "fragment" => Ok(ParserKind::Fragment),
            other => Err(format!(
                "unknown parser {other}, expected one of: document, fragment"
            )),
        }
    }
}

impl std::fmt::Display for ParserKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParserKind::Document => "document",
            ParserKind::Fragment => "fragment",
        };
        write!(f, "{name}")
    }
}

/// Attribute condition used while looking elements up.
#[derive(Debug, Clone, Copy)]
pub enum AttrFilter<'f> {
    Any,
    /// The class attribute contains this class.
    Class(&'f str),
    /// Attribute name, exact attribute value.
    Equals(&'f str, &'f str),
}

/// The handful of navigation operations the scrapers need from a parsed page.
pub trait DocumentView: Sized {
    /// Every descendant with the given tag name that passes `filter`, in document order.
    fn find_all(&self, tag: &str, filter: AttrFilter) -> Vec<Self>;

    fn find(&self, tag: &str, filter: AttrFilter) -> Option<Self> {
        self.find_all(tag, filter).into_iter().next()
    }

    /// First element with the given tag that comes after this element's start tag,
    /// descendants included.
    fn find_next(&self, tag: &str) -> Option<Self>;

    fn next_sibling_element(&self) -> Option<Self>;

    fn text_content(&self) -> String;

    fn attribute(&self, name: &str) -> Option<&str>;
}

impl<'f> AttrFilter<'f> {
    fn matches(&self, element: &ElementRef) -> bool {
        match self {
            AttrFilter::Any => true,
            AttrFilter::Class(class) => element
                .value()
                .attr("class")
                .map_or(false, |v| v.split_whitespace().any(|c| c == *class)),
            AttrFilter::Equals(name, value) => element.value().attr(name) == Some(*value),
        }
    }
}

impl<'a> DocumentView for ElementRef<'a> {
    fn find_all(&self, tag: &str, filter: AttrFilter) -> Vec<Self> {
        self.descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .filter(|e| e.value().name() == tag && filter.matches(e))
            .collect()
    }

    fn find_next(&self, tag: &str) -> Option<Self> {
        let node = **self;
        let following = std::iter::once(node)
            .chain(node.ancestors())
            .flat_map(|n| n.next_siblings())
            .flat_map(|sibling| sibling.descendants());
        node.descendants()
            .skip(1)
            .chain(following)
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == tag)
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.next_siblings().find_map(ElementRef::wrap)
    }

    fn text_content(&self) -> String {
        self.text().collect()
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.value().attr(name)
    }
}

/// A parsed html page.
pub struct Page {
    html: Html,
}

impl Page {
    pub fn parse(body: &str, kind: ParserKind) -> Self {
        let html = match kind {
            ParserKind::Document => Html::parse_document(body),
            ParserKind::Fragment => Html::parse_fragment(body),
        };
        if !html.errors.is_empty() {
            tracing::trace!("Parser reported {} html errors", html.errors.len());
        }
        Self { html }
    }

    pub fn root(&self) -> ElementRef<'_> {
        self.html.root_element()
    }

    pub fn title(&self) -> Option<String> {
        self.root()
            .find("title", AttrFilter::Any)
            .map(|t| t.text_content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head><title>Course</title></head><body>
        <div class="course-item-list-header expanded"><h3>Week 1</h3></div><ul id="w1"><li>a</li></ul>
        <div class="course-item-list-header"><span>no heading here</span></div>
        <ul id="w2"><li><h3>Week 2</h3></li></ul>
        <source type="video/webm" src="v.webm"><source type="video/mp4" src="v.mp4">
        </body></html>"#;

    #[test]
    fn finds_by_tag_and_class() {
        for kind in [ParserKind::Document, ParserKind::Fragment] {
            let page = Page::parse(PAGE, kind);
            let headers = page
                .root()
                .find_all("div", AttrFilter::Class("course-item-list-header"));
            assert_eq!(headers.len(), 2);
            let mp4 = page
                .root()
                .find("source", AttrFilter::Equals("type", "video/mp4"))
                .unwrap();
            assert_eq!(mp4.attribute("src"), Some("v.mp4"));
        }
    }

    #[test]
    fn find_next_walks_in_document_order() {
        let page = Page::parse(PAGE, ParserKind::Document);
        let headers = page
            .root()
            .find_all("div", AttrFilter::Class("course-item-list-header"));
        assert_eq!(headers[0].find_next("h3").unwrap().text_content(), "Week 1");
        // second header has no h3 of its own, the next one in the page wins
        assert_eq!(headers[1].find_next("h3").unwrap().text_content(), "Week 2");
    }

    #[test]
    fn next_sibling_skips_text_nodes() {
        let page = Page::parse(PAGE, ParserKind::Document);
        let header = page
            .root()
            .find("div", AttrFilter::Class("course-item-list-header"))
            .unwrap();
        let list = header.next_sibling_element().unwrap();
        assert_eq!(list.attribute("id"), Some("w1"));
    }

    #[test]
    fn title_and_parser_names() {
        assert_eq!(
            Page::parse(PAGE, ParserKind::Document).title().as_deref(),
            Some("Course")
        );
        assert_eq!("fragment".parse::<ParserKind>(), Ok(ParserKind::Fragment));
        assert_eq!("lxml".parse::<ParserKind>().is_err(), true);
        assert_eq!(ParserKind::Document.to_string(), "document");
    }
}
