use regex::Regex;
use url::form_urlencoded;
use url::Url;

/// Proxy-side paths baked into rewritten playlist references.
#[derive(Debug, Clone)]
pub struct RewriteRoutes {
    pub segment_path: String,
}

impl Default for RewriteRoutes {
    fn default() -> Self {
        Self {
            segment_path: "/segment".to_string(),
        }
    }
}

impl RewriteRoutes {
    pub fn new(segment_path: impl Into<String>) -> Self {
        Self {
            segment_path: segment_path.into(),
        }
    }

    fn proxy_reference(&self, session_id: &str, absolute: &Url) -> String {
        let encoded: String =
            form_urlencoded::byte_serialize(absolute.as_str().as_bytes()).collect();
        format!(
            "{}?sessionId={}&url={}",
            self.segment_path, session_id, encoded
        )
    }
}

enum PlaylistLine<'a> {
    Blank,
    Directive,
    DirectiveWithUri,
    Resource(&'a str),
}

fn classify(line: &str) -> PlaylistLine<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        PlaylistLine::Blank
    } else if trimmed.starts_with('#') {
        if trimmed.contains("URI=\"") {
            PlaylistLine::DirectiveWithUri
        } else {
            PlaylistLine::Directive
        }
    } else {
        PlaylistLine::Resource(trimmed)
    }
}

/// Rewrites every reference in an HLS playlist into a proxy-routed URL bound
/// to the session. Resource lines are resolved against the playlist's own
/// base URL; directive lines pass through untouched except for the value of
/// a `URI="..."` attribute, which gets the same resolve-and-rewrite
/// treatment while the rest of the line stays byte-identical.
pub fn rewrite_playlist(
    body: &str,
    base: &Url,
    session_id: &str,
    routes: &RewriteRoutes,
) -> String {
    // Per-playlist compile keeps this dependency-free of global state; the
    // cost is noise next to one network fetch.
    let uri_attribute = match Regex::new(r#"URI="([^"]*)""#) {
        Ok(re) => re,
        Err(_) => return body.to_string(),
    };

    let mut rewritten = String::with_capacity(body.len() * 2);
    for line in body.lines() {
        match classify(line) {
            PlaylistLine::Blank | PlaylistLine::Directive => rewritten.push_str(line),
            PlaylistLine::DirectiveWithUri => {
                let replaced = uri_attribute.replace_all(line, |caps: &regex::Captures<'_>| {
                    match resolve_reference(base, &caps[1]) {
                        Some(absolute) => {
                            format!("URI=\"{}\"", routes.proxy_reference(session_id, &absolute))
                        }
                        None => caps[0].to_string(),
                    }
                });
                rewritten.push_str(&replaced);
            }
            PlaylistLine::Resource(reference) => match resolve_reference(base, reference) {
                Some(absolute) => {
                    rewritten.push_str(&routes.proxy_reference(session_id, &absolute));
                }
                None => rewritten.push_str(line),
            },
        }
        rewritten.push('\n');
    }
    rewritten
}

/// Absolute URLs are kept as-is; anything else resolves relative to the
/// playlist's base.
fn resolve_reference(base: &Url, reference: &str) -> Option<Url> {
    if let Ok(parsed) = Url::parse(reference) {
        if matches!(parsed.scheme(), "http" | "https") {
            return Some(parsed);
        }
    }
    base.join(reference).ok()
}

/// Recovers the original absolute target from a rewritten reference's query
/// string. The inverse of the rewrite above; the segment relay endpoint is
/// fed exactly this value.
pub fn decode_proxy_reference(reference: &str) -> Option<(String, String)> {
    let query = reference.split_once('?')?.1;
    let mut session_id = None;
    let mut target = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "sessionId" => session_id = Some(value.into_owned()),
            "url" => target = Some(value.into_owned()),
            _ => {}
        }
    }
    Some((session_id?, target?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://host/a/master.m3u8").unwrap()
    }

    #[test]
    fn relative_line_resolves_against_playlist_base() {
        let playlist = "#EXTM3U\n720p/index.m3u8\n";
        let rewritten = rewrite_playlist(playlist, &base(), "sess1", &RewriteRoutes::default());
        let lines: Vec<&str> = rewritten.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        let (session_id, target) = decode_proxy_reference(lines[1]).unwrap();
        assert_eq!(session_id, "sess1");
        assert_eq!(target, "https://host/a/720p/index.m3u8");
    }

    #[test]
    fn absolute_line_round_trips_exactly() {
        let playlist = "#EXTM3U\n#EXTINF:4.000,\nhttps://cdn.other.net/seg/00001.ts?tk=a%20b\n";
        let rewritten = rewrite_playlist(playlist, &base(), "sess1", &RewriteRoutes::default());
        let lines: Vec<&str> = rewritten.lines().collect();
        assert_eq!(lines[1], "#EXTINF:4.000,");
        let (_, target) = decode_proxy_reference(lines[2]).unwrap();
        assert_eq!(target, "https://cdn.other.net/seg/00001.ts?tk=a%20b");
    }

    #[test]
    fn key_directive_rewrites_only_the_uri_attribute() {
        let playlist = "#EXT-X-KEY:METHOD=AES-128,URI=\"keys/k1.bin\",IV=0x9c7db8778570d29\n";
        let rewritten = rewrite_playlist(playlist, &base(), "sess1", &RewriteRoutes::default());
        let line = rewritten.lines().next().unwrap();
        assert!(line.starts_with("#EXT-X-KEY:METHOD=AES-128,URI=\"/segment?sessionId=sess1&url="));
        assert!(line.ends_with(",IV=0x9c7db8778570d29"));
        let uri_value = line
            .split("URI=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        let (_, target) = decode_proxy_reference(uri_value).unwrap();
        assert_eq!(target, "https://host/a/keys/k1.bin");
    }

    #[test]
    fn plain_directives_and_blanks_pass_through() {
        let playlist = "#EXTM3U\n#EXT-X-VERSION:3\n\n#EXT-X-ENDLIST\n";
        let rewritten = rewrite_playlist(playlist, &base(), "sess1", &RewriteRoutes::default());
        assert_eq!(rewritten, playlist);
    }

    #[test]
    fn custom_segment_route_is_honored() {
        let routes = RewriteRoutes::new("/api/relay");
        let rewritten = rewrite_playlist("720p/index.m3u8\n", &base(), "s", &routes);
        assert!(rewritten.starts_with("/api/relay?sessionId=s&url="));
    }
}
