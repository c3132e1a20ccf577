//! Path → artifact extension table.

/// A rendering endpoint whose results can be served from the cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Screenshot,
    Pdf,
    Screencast,
    Scrape,
}

impl Endpoint {
    /// Every cacheable endpoint, in table order.
    pub const ALL: [Endpoint; 4] = [
        Endpoint::Screenshot,
        Endpoint::Pdf,
        Endpoint::Screencast,
        Endpoint::Scrape,
    ];

    /// Resolves a request path. A single trailing slash is ignored.
    ///
    /// ```
    /// use edgecache::cache::Endpoint;
    ///
    /// assert_eq!(Endpoint::from_path("/v1/pdf/"), Some(Endpoint::Pdf));
    /// assert_eq!(Endpoint::from_path("/v1/unknown"), None);
    /// ```
    pub fn from_path(path: &str) -> Option<Self> {
        let path = if path != "/" {
            path.strip_suffix('/').unwrap_or(path)
        } else {
            path
        };
        Self::ALL.into_iter().find(|e| e.path() == path)
    }

    pub fn path(self) -> &'static str {
        match self {
            Self::Screenshot => "/v1/screenshot",
            Self::Pdf => "/v1/pdf",
            Self::Screencast => "/v1/screencast",
            Self::Scrape => "/v1/scrape",
        }
    }

    /// Extension used when the request names no format, or ignores it.
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Screenshot => "jpeg",
            Self::Pdf => "pdf",
            Self::Screencast => "mp4",
            Self::Scrape => "html",
        }
    }

    /// Whether a `format` parameter overrides the default extension.
    pub fn honours_format(self) -> bool {
        !matches!(self, Self::Pdf)
    }

    /// Object extension for a request with the given `format` parameter.
    pub fn extension<'a>(self, format: Option<&'a str>) -> &'a str {
        match format {
            Some(f) if self.honours_format() && !f.is_empty() => f,
            _ => self.default_extension(),
        }
    }
}
