use std::sync::LazyLock;

use futures::future::BoxFuture;
use reqwest::{Client, header};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::ExtractionConfig;
use crate::types::VideoMetadata;

use super::{FetchError, FetchResult};

/// Scrapes the [`VideoMetadata`] from a video page.
pub trait Extractor: Send + Sync + 'static {
    fn extract<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, FetchResult<VideoMetadata>>;
}

static VIDEO: LazyLock<Selector> = LazyLock::new(|| Selector::parse("video").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static AUTHOR_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/@']").unwrap());

/// An [`Extractor`] that fetches the page over HTTP and reads the served markup.
///
/// The video is the `src` of the first `<video>` element, the title is the document `<title>`,
/// and the author is the text of the first link pointing to a `/@user` profile.
#[derive(Debug, Clone)]
pub struct PageExtractor {
    client: Client,
}

impl PageExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &ExtractionConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;
        Ok(Self::new(client))
    }

    async fn fetch_page(&self, url: &Url) -> FetchResult<String> {
        tracing::debug!("Fetching video page `{}`", url);
        let response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "text/html")
            .send()
            .await
            .map_err(|err| FetchError::Extraction(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Extraction(format!(
                "page responded with status {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|err| FetchError::Extraction(err.to_string()))
    }
}

impl Extractor for PageExtractor {
    fn extract<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, FetchResult<VideoMetadata>> {
        Box::pin(async move {
            let page = self.fetch_page(url).await?;
            parse_page(url, &page)
        })
    }
}

/// Extracts the [`VideoMetadata`] from the markup of the page at `url`.
pub(super) fn parse_page(url: &Url, page: &str) -> FetchResult<VideoMetadata> {
    let document = Html::parse_document(page);

    let src = document
        .select(&VIDEO)
        .next()
        .and_then(|video| video.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .ok_or(FetchError::MissingContent("video"))?;
    // relative sources are resolved against the page itself
    let video_url = url
        .join(src)
        .map_err(|err| FetchError::Extraction(format!("invalid video source `{src}`: {err}")))?;

    let title = document
        .select(&TITLE)
        .next()
        .map(element_text)
        .ok_or(FetchError::MissingContent("title"))?;

    let author = document
        .select(&AUTHOR_LINK)
        .next()
        .map(element_text)
        .filter(|author| !author.is_empty())
        .ok_or(FetchError::MissingContent("author"))?;

    Ok(VideoMetadata {
        video_url: video_url.into(),
        title,
        author,
    })
}

/// The text content of `element` and its descendants, without surrounding whitespace.
fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_owned()
}
