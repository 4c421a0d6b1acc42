use tracing::instrument;

const SCHEMES: [&str; 2] = ["http://", "https://"];

/// Whether `url` can be fetched as is.
pub fn is_absolute_url(url: &str) -> bool {
    scheme_of(url).is_some()
}

fn scheme_of(url: &str) -> Option<&'static str> {
    SCHEMES.into_iter().find(|scheme| url.starts_with(scheme))
}

/// Turns the links found on scraped pages into absolute ones.
///
/// The resolver keeps a single "current base": the directory part of the
/// last page it was pointed at. Relative links are resolved against that base
/// until a new one is adopted.
#[derive(Debug, Clone, Default)]
pub struct AbsoluteUrlResolver {
    base: String,
    replace_base: bool,
}

impl AbsoluteUrlResolver {
    pub fn new(base: &str) -> Self {
        Self {
            base: normalize_base(base),
            replace_base: false,
        }
    }

    /// A resolver that adopts every absolute url it sees as its new base.
    pub fn replacing(base: &str) -> Self {
        Self {
            base: normalize_base(base),
            replace_base: true,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Get the absolute form of `url`. Links that can't be resolved (a `../`
    /// climbing above the host) come back untouched, check the result with
    /// [`is_absolute_url`].
    #[instrument(level = "trace")]
    pub fn resolve(&mut self, url: &str) -> String {
        if self.base.is_empty() || (self.replace_base && is_absolute_url(url)) {
            self.base = normalize_base(url);
            return url.to_string();
        }
        if is_absolute_url(url) {
            return url.to_string();
        }

        let Some(scheme) = scheme_of(&self.base) else {
            tracing::debug!("Base {} isn't absolute, can't resolve {}", self.base, url);
            return url.to_string();
        };
        // host plus directories, always ending with '/'
        let rest = &self.base[scheme.len()..];

        if let Some(parent_relative) = url.strip_prefix("../") {
            let dir = rest.trim_end_matches('/');
            match dir.rfind('/') {
                Some(idx) => format!("{}{}{}", scheme, &dir[..=idx], parent_relative),
                None => {
                    tracing::debug!("{} climbs above {}, broken link?", url, self.base);
                    url.to_string()
                }
            }
        } else if url.starts_with('/') {
            let host = rest.split('/').next().unwrap_or_default();
            format!("{}{}{}", scheme, host, url)
        } else {
            let same_dir = url.strip_prefix("./").unwrap_or(url);
            format!("{}{}", self.base, same_dir)
        }
    }
}

/// Keeps only the directory part of an absolute url: everything up to the
/// last '/' after the scheme. Anything else is kept as is.
fn normalize_base(url: &str) -> String {
    match scheme_of(url) {
        Some(scheme) => {
            let rest = &url[scheme.len()..];
            match rest.rfind('/') {
                Some(idx) => format!("{}{}", scheme, &rest[..=idx]),
                None => format!("{}{}/", scheme, rest),
            }
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LECTURES: &str = "http://site/class/x/lecture/index";

    #[test]
    fn base_is_the_directory_of_the_page() {
        assert_eq!(
            AbsoluteUrlResolver::new(LECTURES).base(),
            "http://site/class/x/lecture/"
        );
        assert_eq!(
            AbsoluteUrlResolver::new("https://site").base(),
            "https://site/"
        );
    }

    #[test]
    fn resolves_the_usual_link_shapes() {
        let mut resolver = AbsoluteUrlResolver::new(LECTURES);
        assert_eq!(
            resolver.resolve("foo.mp4"),
            "http://site/class/x/lecture/foo.mp4"
        );
        assert_eq!(
            resolver.resolve("./foo.mp4"),
            "http://site/class/x/lecture/foo.mp4"
        );
        assert_eq!(resolver.resolve("../y/bar.pdf"), "http://site/class/x/y/bar.pdf");
        assert_eq!(resolver.resolve("/root.html"), "http://site/root.html");
    }

    #[test]
    fn absolute_links_pass_through_without_moving_the_base() {
        let mut resolver = AbsoluteUrlResolver::new(LECTURES);
        assert_eq!(resolver.resolve("http://other/z"), "http://other/z");
        assert_eq!(resolver.base(), "http://site/class/x/lecture/");
        assert_eq!(
            resolver.resolve("notes.txt"),
            "http://site/class/x/lecture/notes.txt"
        );
    }

    #[test]
    fn replacing_resolver_follows_absolute_links() {
        let mut resolver = AbsoluteUrlResolver::replacing(LECTURES);
        assert_eq!(
            resolver.resolve("https://cdn.example/media/v/1.html"),
            "https://cdn.example/media/v/1.html"
        );
        assert_eq!(resolver.base(), "https://cdn.example/media/v/");
        assert_eq!(resolver.resolve("2.mp4"), "https://cdn.example/media/v/2.mp4");
    }

    #[test]
    fn first_link_becomes_the_base_when_there_is_none() {
        let mut resolver = AbsoluteUrlResolver::default();
        assert_eq!(resolver.resolve("http://site/a/b.html"), "http://site/a/b.html");
        assert_eq!(resolver.base(), "http://site/a/");
    }

    #[test]
    fn parent_of_the_host_is_left_unresolved() {
        let mut resolver = AbsoluteUrlResolver::new("http://site/index.html");
        assert_eq!(resolver.resolve("../up.pdf"), "../up.pdf");
        assert!(!is_absolute_url("../up.pdf"));
    }

    #[test]
    fn relative_base_cannot_resolve() {
        let mut resolver = AbsoluteUrlResolver::new("lecture/index");
        assert_eq!(resolver.resolve("a.pdf"), "a.pdf");
    }
}
