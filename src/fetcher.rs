use std::time::Duration;

use chrono::Utc;
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::FetchError;
use crate::model::Article;

/// A remote feed reduced to what the store keeps.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFeed {
    pub title: String,
    pub description: String,
    pub link: String,
    pub articles: Vec<Article>,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::new(
            Duration::from_secs(config.fetch_timeout_secs),
            &config.user_agent,
        )
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        info!("Fetching feed: {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let bytes = response.bytes().await?;
        let feed = Self::parse(&bytes)?;

        debug!("Parsed {} articles from {}", feed.articles.len(), url);
        Ok(feed)
    }

    pub fn parse(bytes: &[u8]) -> Result<FetchedFeed, FetchError> {
        // Entries without a guid keep an empty id; identity is decided by
        // `derive_article_id`, not by the parser's generated hashes.
        let parsed = parser::Builder::new()
            .id_generator(|_, _, _| String::new())
            .build()
            .parse(bytes)
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        Ok(FetchedFeed {
            title: parsed.title.map(|t| t.content).unwrap_or_default(),
            description: parsed.description.map(|d| d.content).unwrap_or_default(),
            link: parsed
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            articles: parsed.entries.into_iter().map(Self::normalize_entry).collect(),
        })
    }

    pub fn normalize_entry(entry: Entry) -> Article {
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();

        // An unparseable date arrives as None; the article is kept without it.
        let pub_date = entry.published.or(entry.updated);

        Article {
            id: derive_article_id(&entry.id, &link),
            title: entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string()),
            description: entry.summary.map(|s| s.content).unwrap_or_default(),
            content: entry.content.and_then(|c| c.body).unwrap_or_default(),
            author: entry
                .authors
                .first()
                .map(|a| a.name.clone())
                .unwrap_or_default(),
            categories: entry.categories.into_iter().map(|c| c.term).collect(),
            link,
            pub_date,
        }
    }
}

/// Identity of an article: its guid, else its link, else a synthesized
/// value. Read state is keyed by this id, so it must not change between
/// fetches of the same item. The synthesized fallback does change.
pub fn derive_article_id(guid: &str, link: &str) -> String {
    let guid = guid.trim();
    if !guid.is_empty() {
        return guid.to_string();
    }

    let link = link.trim();
    if !link.is_empty() {
        return link.to_string();
    }

    synthesize_article_id()
}

fn synthesize_article_id() -> String {
    format!(
        "synthetic-{}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
            <channel>
                <title>Tech News</title>
                <link>https://technews.example.com</link>
                <description>Latest tech news</description>
                <item>
                    <title>Breaking: New Technology Announced</title>
                    <link>https://technews.example.com/article/1</link>
                    <guid>https://technews.example.com/article/1</guid>
                    <description>Short summary</description>
                    <content:encoded><![CDATA[<p>Full body</p>]]></content:encoded>
                    <category>hardware</category>
                    <category>launch</category>
                    <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                </item>
                <item>
                    <title>Review: Latest Gadget</title>
                    <link>https://technews.example.com/article/2</link>
                    <guid>gadget-review-2</guid>
                    <pubDate>not a date at all</pubDate>
                </item>
            </channel>
        </rss>
    "#;

    mod derive_article_id_tests {
        use super::*;

        #[test]
        fn test_prefers_guid() {
            assert_eq!(derive_article_id("guid-1", "https://a.example/1"), "guid-1");
        }

        #[test]
        fn test_falls_back_to_link() {
            assert_eq!(derive_article_id("", "https://a.example/1"), "https://a.example/1");
            assert_eq!(derive_article_id("   ", "https://a.example/1"), "https://a.example/1");
        }

        #[test]
        fn test_synthesizes_when_both_missing() {
            let first = derive_article_id("", "");
            let second = derive_article_id("", "");
            assert!(first.starts_with("synthetic-"));
            assert!(second.starts_with("synthetic-"));
            assert_ne!(first, second);
        }
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_parses_channel_metadata() {
            let feed = Fetcher::parse(RSS.as_bytes()).unwrap();
            assert_eq!(feed.title, "Tech News");
            assert_eq!(feed.description, "Latest tech news");
            assert!(feed.link.starts_with("https://technews.example.com"));
            assert_eq!(feed.articles.len(), 2);
        }

        #[test]
        fn test_normalizes_article_fields() {
            let feed = Fetcher::parse(RSS.as_bytes()).unwrap();
            let article = &feed.articles[0];

            assert_eq!(article.id, "https://technews.example.com/article/1");
            assert_eq!(article.title, "Breaking: New Technology Announced");
            assert_eq!(article.link, "https://technews.example.com/article/1");
            assert_eq!(article.description, "Short summary");
            assert_eq!(article.content, "<p>Full body</p>");
            assert!(article.categories.contains("hardware"));
            assert!(article.categories.contains("launch"));
            assert_eq!(
                article.pub_date.map(|d| d.to_rfc3339()),
                Some("2024-12-09T12:00:00+00:00".to_string())
            );
        }

        #[test]
        fn test_bad_date_degrades_to_none() {
            let feed = Fetcher::parse(RSS.as_bytes()).unwrap();
            let article = &feed.articles[1];
            assert_eq!(article.id, "gadget-review-2");
            assert!(article.pub_date.is_none());
        }

        #[test]
        fn test_identity_is_stable_across_parses() {
            let first = Fetcher::parse(RSS.as_bytes()).unwrap();
            let second = Fetcher::parse(RSS.as_bytes()).unwrap();
            let ids = |f: &FetchedFeed| f.articles.iter().map(|a| a.id.clone()).collect::<Vec<_>>();
            assert_eq!(ids(&first), ids(&second));
        }

        #[test]
        fn test_parses_atom() {
            let atom = r#"<?xml version="1.0" encoding="utf-8"?>
                <feed xmlns="http://www.w3.org/2005/Atom">
                    <title>Atom Blog</title>
                    <id>urn:uuid:blog</id>
                    <updated>2024-12-09T12:00:00Z</updated>
                    <entry>
                        <title>First Post</title>
                        <id>urn:uuid:post-1</id>
                        <link href="https://blog.example.com/first"/>
                        <updated>2024-12-09T12:00:00Z</updated>
                        <author><name>Sam</name></author>
                    </entry>
                </feed>
            "#;

            let feed = Fetcher::parse(atom.as_bytes()).unwrap();
            assert_eq!(feed.title, "Atom Blog");
            assert_eq!(feed.articles[0].id, "urn:uuid:post-1");
            assert_eq!(feed.articles[0].author, "Sam");
            assert!(feed.articles[0].pub_date.is_some());
        }

        #[test]
        fn test_item_without_guid_uses_link() {
            let rss = r#"<?xml version="1.0" encoding="UTF-8"?>
                <rss version="2.0">
                    <channel>
                        <title>Links Only</title>
                        <item>
                            <title>A</title>
                            <link>https://x.example/a</link>
                        </item>
                    </channel>
                </rss>
            "#;

            let feed = Fetcher::parse(rss.as_bytes()).unwrap();
            assert_eq!(feed.articles[0].id, "https://x.example/a");
        }

        #[test]
        fn test_link_id_survives_title_edit() {
            let before = r#"<rss version="2.0"><channel><title>T</title>
                <item><title>Draft</title><link>https://x.example/a</link></item>
                </channel></rss>"#;
            let after = r#"<rss version="2.0"><channel><title>T</title>
                <item><title>Final title</title><link>https://x.example/a</link></item>
                </channel></rss>"#;

            let first = Fetcher::parse(before.as_bytes()).unwrap();
            let second = Fetcher::parse(after.as_bytes()).unwrap();
            assert_eq!(first.articles[0].id, second.articles[0].id);
        }

        #[test]
        fn test_item_without_guid_or_link_is_synthesized() {
            let rss = r#"<?xml version="1.0" encoding="UTF-8"?>
                <rss version="2.0">
                    <channel>
                        <title>Bare</title>
                        <item><title>No identity</title></item>
                        <item><description>Nothing at all</description></item>
                    </channel>
                </rss>
            "#;

            let feed = Fetcher::parse(rss.as_bytes()).unwrap();
            assert_eq!(feed.articles.len(), 2);
            assert!(feed.articles[0].id.starts_with("synthetic-"));
            assert!(feed.articles[1].id.starts_with("synthetic-"));
            assert_ne!(feed.articles[0].id, feed.articles[1].id);
        }

        #[test]
        fn test_rejects_non_feed() {
            let result = Fetcher::parse(b"<html><body>nope</body></html>");
            assert!(matches!(result, Err(FetchError::Parse(_))));
        }
    }
}
