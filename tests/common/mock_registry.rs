//! Mock registry server: feed index, feeds and package downloads

use serde_json::{Map, Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// Path of the feed index on the mock server.
pub const FEED_INDEX_PATH: &str = "/package-feeds.json";

/// Prefix of the per-package download endpoint.
pub const PACKAGES_PREFIX: &str = "/packages";

/// One downloadable package archive.
#[derive(Debug, Clone)]
pub struct MockPackageData {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub dependencies: Vec<(String, String)>,
    pub with_manifest: bool,
    pub status: u16,
    pub content: Option<Vec<u8>>,
}

impl MockPackageData {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            description: Some(format!("Test package {name}")),
            dependencies: Vec::new(),
            with_manifest: true,
            status: 200,
            content: None,
        }
    }

    pub fn with_dependency(mut self, name: &str, version: &str) -> Self {
        self.dependencies.push((name.to_string(), version.to_string()));
        self
    }

    pub fn with_description(mut self, description: Option<&str>) -> Self {
        self.description = description.map(str::to_string);
        self
    }

    pub fn without_manifest(mut self) -> Self {
        self.with_manifest = false;
        self
    }

    /// Serve this status instead of an archive.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn manifest(&self) -> Value {
        let mut manifest = Map::new();
        manifest.insert("name".to_string(), json!(self.name));
        manifest.insert("version".to_string(), json!(self.version));
        if let Some(description) = &self.description {
            manifest.insert("description".to_string(), json!(description));
        }
        let deps: Map<String, Value> = self
            .dependencies
            .iter()
            .map(|(name, version)| (name.clone(), json!(version)))
            .collect();
        manifest.insert("dependencies".to_string(), Value::Object(deps));
        Value::Object(manifest)
    }

    pub fn tarball(&self) -> Vec<u8> {
        let mut members: Vec<(String, String)> = vec![(
            "package/other/readme.md".to_string(),
            format!("# {}", self.name),
        )];
        if self.with_manifest {
            members.push((
                "package/package.json".to_string(),
                serde_json::to_string_pretty(&self.manifest()).unwrap(),
            ));
        }
        build_tarball(&members)
    }
}

/// One registry feed listed in the index.
#[derive(Debug, Clone)]
pub struct MockFeed {
    pub name: String,
    pub packages: Vec<Value>,
    pub status: u16,
    pub raw_body: Option<String>,
}

impl MockFeed {
    pub fn new(name: &str, packages: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            packages,
            status: 200,
            raw_body: None,
        }
    }

    pub fn failing(name: &str, status: u16) -> Self {
        Self {
            status,
            ..Self::new(name, Vec::new())
        }
    }

    pub fn non_json(name: &str) -> Self {
        Self {
            raw_body: Some("<html>maintenance</html>".to_string()),
            ..Self::new(name, Vec::new())
        }
    }

    fn path(&self) -> String {
        format!("/feeds/{}.json", self.name)
    }
}

/// Mock registry server for testing
pub struct MockRegistry {
    server: MockServer,
    feeds: Vec<MockFeed>,
    packages: Vec<MockPackageData>,
    feed_delay: Option<std::time::Duration>,
}

impl MockRegistry {
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
            feeds: Vec::new(),
            packages: Vec::new(),
            feed_delay: None,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn feed_index_url(&self) -> String {
        format!("{}{FEED_INDEX_PATH}", self.server.uri())
    }

    pub fn package_base_url(&self) -> String {
        format!("{}{PACKAGES_PREFIX}", self.server.uri())
    }

    pub fn add_feed(&mut self, feed: MockFeed) {
        self.feeds.push(feed);
    }

    pub fn add_package(&mut self, package: MockPackageData) {
        self.packages.push(package);
    }

    /// Delay every feed response.
    pub fn with_feed_delay(&mut self, delay: std::time::Duration) {
        self.feed_delay = Some(delay);
    }

    /// Mounts the feed index, every feed and every package download.
    pub async fn setup_mocks(&self) {
        let index = json!({
            "feeds": self
                .feeds
                .iter()
                .map(|feed| json!({"name": feed.name, "url": format!("{}{}", self.uri(), feed.path())}))
                .collect::<Vec<_>>()
        });
        Mock::given(method("GET"))
            .and(path(FEED_INDEX_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(index))
            .mount(&self.server)
            .await;

        for feed in &self.feeds {
            let mut response = match (&feed.raw_body, feed.status) {
                (Some(body), _) => ResponseTemplate::new(200).set_body_string(body.clone()),
                (None, 200) => {
                    ResponseTemplate::new(200).set_body_json(json!({ "packages": feed.packages }))
                }
                (None, status) => ResponseTemplate::new(status),
            };
            if let Some(delay) = self.feed_delay {
                response = response.set_delay(delay);
            }
            Mock::given(method("GET"))
                .and(path(feed.path()))
                .respond_with(response)
                .mount(&self.server)
                .await;
        }

        for package in &self.packages {
            let response = if package.status == 200 {
                ResponseTemplate::new(200)
                    .set_body_bytes(package.content.clone().unwrap_or_else(|| package.tarball()))
                    .insert_header("content-type", "application/gzip")
            } else {
                ResponseTemplate::new(package.status)
            };
            Mock::given(method("GET"))
                .and(path(format!(
                    "{PACKAGES_PREFIX}/{}/{}",
                    package.name, package.version
                )))
                .respond_with(response)
                .mount(&self.server)
                .await;
        }
    }

    /// Index document served at an arbitrary status, for index failure tests.
    pub async fn mount_index_response(&self, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(FEED_INDEX_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    pub async fn request_paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|req| req.url.path().to_string())
            .collect()
    }

    /// Number of requests that hit the package download endpoint.
    pub async fn download_count(&self) -> usize {
        self.request_paths()
            .await
            .iter()
            .filter(|p| p.starts_with(PACKAGES_PREFIX))
            .count()
    }

    pub async fn download_count_for(&self, name: &str, version: &str) -> usize {
        let expected = format!("{PACKAGES_PREFIX}/{name}/{version}");
        self.request_paths()
            .await
            .iter()
            .filter(|p| **p == expected)
            .count()
    }
}

/// Gzipped tar stream holding the given `(path, content)` members.
pub fn build_tarball(members: &[(String, String)]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::{Builder, Header};

    let mut buf = Vec::new();
    {
        let encoder = GzEncoder::new(&mut buf, Compression::default());
        let mut tar = Builder::new(encoder);
        for (member_path, content) in members {
            let mut header = Header::new_gnu();
            header.set_path(member_path).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, content.as_bytes()).unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap();
    }
    buf
}
