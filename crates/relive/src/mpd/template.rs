//! Media path templates.
//!
//! From DASH-IF IOP: only `%0[width]d` is permitted as a format identifier,
//! so the substitution can be done without a printf implementation. The
//! template is tokenized once at construction; rendering is a straight
//! concatenation of the parts.

use std::sync::LazyLock;

use regex::Regex;

static TEMPLATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(RepresentationID|Number|Time)(?:%0(\d+)d)?\$").unwrap());

#[derive(Debug)]
enum Part {
    Literal(String),
    Time(Option<usize>),
    Number(Option<usize>),
    RepresentationId(Option<usize>),
}

#[derive(Debug)]
pub struct PathTemplate {
    parts: Vec<Part>,
}

impl PathTemplate {
    /// Tokenize a media template. Anything that is not a recognized token
    /// stays literal, so an ill-formed template renders verbatim.
    pub fn new(template: &str) -> Self {
        let mut parts = Vec::new();
        let mut last = 0;
        for caps in TEMPLATE_REGEX.captures_iter(template) {
            let all = caps.get(0).unwrap();
            if all.start() > last {
                parts.push(Part::Literal(template[last..all.start()].to_string()));
            }
            let width = caps.get(2).and_then(|w| w.as_str().parse().ok());
            parts.push(match caps.get(1).unwrap().as_str() {
                "Time" => Part::Time(width),
                "Number" => Part::Number(width),
                _ => Part::RepresentationId(width),
            });
            last = all.end();
        }
        if last < template.len() {
            parts.push(Part::Literal(template[last..].to_string()));
        }
        PathTemplate { parts }
    }

    pub fn render(&self, time: u64, number: u64, representation_id: &str) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Time(None) => {
                    let _ = write!(out, "{time}");
                }
                Part::Time(Some(width)) => {
                    let _ = write!(out, "{time:0width$}");
                }
                Part::Number(None) => {
                    let _ = write!(out, "{number}");
                }
                Part::Number(Some(width)) => {
                    let _ = write!(out, "{number:0width$}");
                }
                Part::RepresentationId(None) => out.push_str(representation_id),
                Part::RepresentationId(Some(width)) => {
                    let _ = write!(out, "{representation_id:0>width$}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::PathTemplate;

    #[test]
    fn substitutes_all_tokens() {
        let template = PathTemplate::new("$RepresentationID$/$Time$-$Number$.m4s");
        assert_eq!(template.render(3, 2, "v1"), "v1/3-2.m4s");
    }

    #[test]
    fn pads_to_width() {
        assert_eq!(PathTemplate::new("$Time%08d$").render(42, 0, ""), "00000042");
        assert_eq!(PathTemplate::new("$Number%03d$").render(0, 7, ""), "007");
        assert_eq!(
            PathTemplate::new("$RepresentationID%02d$").render(0, 0, "1"),
            "01"
        );
    }

    #[test]
    fn unknown_tokens_stay_verbatim() {
        let template = PathTemplate::new("$Bogus$/chunk-$Time$.m4s");
        assert_eq!(template.render(9, 0, ""), "$Bogus$/chunk-9.m4s");
    }

    #[test]
    fn templates_without_tokens_render_verbatim() {
        let template = PathTemplate::new("media/segment.m4s");
        assert_eq!(template.render(1, 2, "x"), "media/segment.m4s");
    }
}
