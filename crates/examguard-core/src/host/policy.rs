//! Content and navigation policy for the exam window.

use reqwest::Url;
use tracing::warn;

/// Builder for the Content-Security-Policy header sent with every page.
#[derive(Debug, Clone)]
pub struct ContentSecurityPolicy {
    connect_src: Vec<String>,
    img_src: Vec<String>,
    media_src: Vec<String>,
}

impl Default for ContentSecurityPolicy {
    fn default() -> Self {
        Self {
            connect_src: vec!["'self'".to_string()],
            img_src: vec!["'self'".to_string(), "data:".to_string()],
            media_src: vec!["'self'".to_string(), "blob:".to_string()],
        }
    }
}

impl ContentSecurityPolicy {
    /// Allow XHR/fetch to `origin` (typically the API).
    pub fn connect_to(mut self, origin: &str) -> Self {
        push_unique(&mut self.connect_src, origin);
        self
    }

    pub fn images_from(mut self, origin: &str) -> Self {
        push_unique(&mut self.img_src, origin);
        self
    }

    pub fn media_from(mut self, origin: &str) -> Self {
        push_unique(&mut self.media_src, origin);
        self
    }

    pub fn header_value(&self) -> String {
        [
            "default-src 'self'".to_string(),
            "script-src 'self'".to_string(),
            "style-src 'self' 'unsafe-inline'".to_string(),
            format!("connect-src {}", self.connect_src.join(" ")),
            format!("img-src {}", self.img_src.join(" ")),
            format!("media-src {}", self.media_src.join(" ")),
            "object-src 'none'".to_string(),
            "base-uri 'self'".to_string(),
            "form-action 'self'".to_string(),
            "frame-ancestors 'none'".to_string(),
        ]
        .join("; ")
    }
}

fn push_unique(list: &mut Vec<String>, source: &str) {
    if !list.iter().any(|s| s == source) {
        list.push(source.to_string());
    }
}

/// Where the exam window may go.
#[derive(Debug, Clone)]
pub struct NavigationPolicy {
    origins: Vec<String>,
}

impl NavigationPolicy {
    /// Build from a list of URLs or bare origins. Unparseable entries are
    /// skipped with a warning.
    pub fn new(allowed: &[String]) -> Self {
        let mut origins = Vec::new();
        for entry in allowed {
            match origin_of(entry) {
                Some(origin) => push_unique(&mut origins, &origin),
                None => warn!(entry = %entry, "Ignoring unparseable allowed origin"),
            }
        }
        Self { origins }
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    pub fn allows_navigation(&self, url: &str) -> bool {
        match origin_of(url) {
            Some(origin) => self.origins.iter().any(|allowed| *allowed == origin),
            None => false,
        }
    }

    /// Requests to open another top-level window are always refused.
    pub fn allows_new_window(&self, _url: &str) -> bool {
        false
    }
}

fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csp_is_restrictive() {
        let csp = ContentSecurityPolicy::default()
            .connect_to("https://api.example.org")
            .connect_to("https://api.example.org")
            .header_value();
        assert!(csp.starts_with("default-src 'self'"));
        assert!(csp.contains("object-src 'none'"));
        assert!(csp.contains("frame-ancestors 'none'"));
        assert!(csp.contains("connect-src 'self' https://api.example.org;"));
        assert_eq!(csp.matches("https://api.example.org").count(), 1);
    }

    #[test]
    fn test_navigation_allow_list() {
        let policy = NavigationPolicy::new(&[
            "http://localhost:3001".to_string(),
            "https://exam.example.org/app".to_string(),
            "not a url".to_string(),
        ]);
        assert_eq!(policy.origins().len(), 2);
        assert!(policy.allows_navigation("http://localhost:3001/quiz/4"));
        assert!(policy.allows_navigation("https://exam.example.org/other"));
        assert!(!policy.allows_navigation("http://localhost:3002/"));
        assert!(!policy.allows_navigation("https://exam.example.org.evil.com/"));
        assert!(!policy.allows_navigation("file:///etc/passwd"));
        assert!(!policy.allows_navigation("javascript:alert(1)"));
    }

    #[test]
    fn test_new_windows_denied() {
        let policy = NavigationPolicy::new(&["http://localhost:3001".to_string()]);
        assert!(!policy.allows_new_window("http://localhost:3001/popup"));
    }
}
