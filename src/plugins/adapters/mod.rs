pub mod html;
pub mod json;

pub use html::{HtmlCatalogAdapter, SelectorProfile};
pub use json::{JsonCatalogAdapter, JsonProfile};

const ORGANIC_MARKERS: [&str; 5] = ["organic", "bio ", "عضوي", "اورجانيك", "أورجانيك"];

/// True when listing text advertises itself as organic.
pub fn detect_organic(text: &str) -> bool {
    let text = format!("{} ", text.to_lowercase());
    ORGANIC_MARKERS.iter().any(|marker| text.contains(marker))
}

// Collapses runs of whitespace left over from HTML markup.
pub(crate) fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
