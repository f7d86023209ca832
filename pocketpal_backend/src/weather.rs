//! Plain-text weather summaries for contacts with weather sync enabled.

use reqwest::Url;

use crate::contact::ContactProfile;

pub struct WeatherClient {
    client: reqwest::Client,
    base_url: String,
}

impl WeatherClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// `{base}/{location}?format=3`, with the location as a single
    /// percent-encoded path segment. A blank location leaves the service to
    /// guess from the caller's address.
    pub fn summary_url(&self, location: &str) -> Option<Url> {
        let mut url = Url::parse(self.base_url.trim_end_matches('/')).ok()?;
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments.pop_if_empty();
            let location = location.trim();
            if !location.is_empty() {
                segments.push(location);
            }
        }
        url.set_query(Some("format=3"));
        Some(url)
    }

    /// Summary for a contact with weather sync on; `None` otherwise.
    pub async fn summary_for(&self, profile: &ContactProfile) -> Option<String> {
        if !profile.weather_sync {
            return None;
        }
        self.fetch(profile.location().unwrap_or("")).await
    }

    /// One-line summary for `location`. Failures are logged and swallowed;
    /// the prompt simply goes without weather.
    pub async fn fetch(&self, location: &str) -> Option<String> {
        let Some(url) = self.summary_url(location) else {
            tracing::warn!("Invalid weather service URL: {}", self.base_url);
            return None;
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Weather lookup for {} failed: {}", location, e);
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!("Weather lookup for {} returned {}", location, response.status());
            return None;
        }

        match response.text().await {
            Ok(body) => {
                let summary = body.trim();
                (!summary.is_empty()).then(|| summary.to_string())
            }
            Err(e) => {
                tracing::warn!("Weather response for {} unreadable: {}", location, e);
                None
            }
        }
    }
}
