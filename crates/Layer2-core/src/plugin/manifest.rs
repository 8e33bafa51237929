//! Plugin Manifest - manifest.json 파싱 및 검증

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use trellis_foundation::{Error, Result};

/// 플러그인 디렉토리 안의 매니페스트 파일명
pub const MANIFEST_FILE: &str = "manifest.json";

const REQUIRED_FIELDS: [&str; 6] = ["name", "pluginId", "version", "description", "author", "main"];

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"^\d+\.\d+\.\d+$").unwrap();
    static ref PLUGIN_ID_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap();
    static ref ID_STRIP_RE: Regex = Regex::new(r"[^a-z0-9\s_]").unwrap();
    static ref ID_SPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref ID_UNDERSCORE_RE: Regex = Regex::new(r"_+").unwrap();
}

// ============================================================================
// ManifestVersion
// ============================================================================

/// MAJOR.MINOR.PATCH 버전
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManifestVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ManifestVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// 버전 문자열 파싱 (예: "1.2.3")
    pub fn parse(s: &str) -> Option<Self> {
        if !VERSION_RE.is_match(s) {
            return None;
        }
        let mut parts = s.split('.');
        Some(Self {
            major: parts.next()?.parse().ok()?,
            minor: parts.next()?.parse().ok()?,
            patch: parts.next()?.parse().ok()?,
        })
    }
}

impl std::fmt::Display for ManifestVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ============================================================================
// Extension point declarations
// ============================================================================

/// GraphQL 필드 기여 선언
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlExtension {
    /// query | mutation | subscription
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub builder_definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// 영속 스키마 기여 선언 (table / enum / relation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseExtension {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// 훅 선언
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookExtension {
    /// pre | post
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// 웹훅 선언
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookExtension {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// 종류별 확장 포인트
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionPoints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub graphql: Vec<GraphqlExtension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub database: Vec<DatabaseExtension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookExtension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhooks: Vec<WebhookExtension>,
}

impl ExtensionPoints {
    pub fn is_empty(&self) -> bool {
        self.graphql.is_empty()
            && self.database.is_empty()
            && self.hooks.is_empty()
            && self.webhooks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.graphql.len() + self.database.len() + self.hooks.len() + self.webhooks.len()
    }
}

/// 사이드카 컨테이너 설정
///
/// 단계별 플래그는 지정하지 않으면 true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_on_install: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_on_activate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_on_deactivate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_uninstall: Option<bool>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl DockerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

// ============================================================================
// PluginManifest
// ============================================================================

/// 검증된 플러그인 매니페스트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub name: String,
    pub plugin_id: String,
    pub version: String,
    pub description: String,
    pub author: String,
    /// 진입 모듈 경로 (플러그인 디렉토리 기준)
    pub main: String,
    #[serde(default, skip_serializing_if = "ExtensionPoints::is_empty")]
    pub extension_points: ExtensionPoints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,
}

impl PluginManifest {
    /// 최소 필드만 채운 매니페스트 (version 1.0.0, main "index")
    pub fn new(plugin_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_id: plugin_id.into(),
            version: ManifestVersion::new(1, 0, 0).to_string(),
            description: String::new(),
            author: String::new(),
            main: "index".to_string(),
            extension_points: ExtensionPoints::default(),
            docker: None,
        }
    }

    pub fn parsed_version(&self) -> Option<ManifestVersion> {
        ManifestVersion::parse(&self.version)
    }

    pub fn with_version(mut self, version: ManifestVersion) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_main(mut self, main: impl Into<String>) -> Self {
        self.main = main.into();
        self
    }

    pub fn with_graphql(mut self, ext: GraphqlExtension) -> Self {
        self.extension_points.graphql.push(ext);
        self
    }

    pub fn with_database(mut self, ext: DatabaseExtension) -> Self {
        self.extension_points.database.push(ext);
        self
    }

    pub fn with_hook(mut self, ext: HookExtension) -> Self {
        self.extension_points.hooks.push(ext);
        self
    }

    pub fn with_webhook(mut self, ext: WebhookExtension) -> Self {
        self.extension_points.webhooks.push(ext);
        self
    }

    pub fn with_docker(mut self, docker: DockerConfig) -> Self {
        self.docker = Some(docker);
        self
    }
}

// ============================================================================
// 검증 / 유틸리티
// ============================================================================

/// 플러그인 ID 문법 검사 (`^[A-Za-z][A-Za-z0-9_]*$`)
pub fn is_valid_plugin_id(plugin_id: &str) -> bool {
    PLUGIN_ID_RE.is_match(plugin_id)
}

/// 표시 이름에서 snake_case 플러그인 ID 생성
///
/// "My Cool Plugin!" → "my_cool_plugin"
pub fn generate_plugin_id(name: &str) -> String {
    let lower = name.to_lowercase();
    let stripped = ID_STRIP_RE.replace_all(&lower, "");
    let spaced = ID_SPACE_RE.replace_all(&stripped, "_");
    let collapsed = ID_UNDERSCORE_RE.replace_all(&spaced, "_");
    collapsed.trim_matches('_').to_string()
}

/// 매니페스트 구조 검증
///
/// 위반 사항을 모두 모아 하나의 `ManifestInvalid` 로 반환한다.
pub fn validate_manifest(value: &Value) -> Result<PluginManifest> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::ManifestInvalid("manifest must be a JSON object".to_string()))?;

    let mut violations = Vec::new();

    for field in REQUIRED_FIELDS {
        match obj.get(field).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => {}
            _ => violations.push(format!("field '{}' must be a non-empty string", field)),
        }
    }

    if let Some(version) = obj.get("version").and_then(Value::as_str) {
        if !version.is_empty() && !VERSION_RE.is_match(version) {
            violations.push(format!(
                "version '{}' must be in MAJOR.MINOR.PATCH format",
                version
            ));
        }
    }

    if let Some(plugin_id) = obj.get("pluginId").and_then(Value::as_str) {
        if !plugin_id.is_empty() && !is_valid_plugin_id(plugin_id) {
            violations.push(format!(
                "pluginId '{}' must start with a letter and contain only letters, digits and underscores",
                plugin_id
            ));
        }
    }

    if !violations.is_empty() {
        return Err(Error::ManifestInvalid(violations.join("; ")));
    }

    serde_json::from_value(value.clone())
        .map_err(|e| Error::ManifestInvalid(format!("malformed manifest: {}", e)))
}

/// 디렉토리의 manifest.json 을 읽고 검증
pub async fn load_manifest(plugin_dir: &Path) -> Result<PluginManifest> {
    let path = plugin_dir.join(MANIFEST_FILE);
    let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
        Error::ManifestInvalid(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::ManifestInvalid(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    validate_manifest(&value)
}
