//! API キーの解決とキャッシュ
//!
//! # 責務
//!
//! - プロバイダーごとの API キーの解決インターフェース [`CredentialResolver`]
//! - API キーの保存先 [`CredentialSource`]（TOML 設定ファイル [`SettingsFile`]、固定値 [`StaticCredentials`]）
//! - TTL と明示的な無効化を持つキャッシュ [`CredentialCache`]
//! - 表示用のマスク処理 [`mask_secret`]
//!
//! キャッシュはプロセスごとに 1 つ生成し、参照で共有します（グローバル状態は持ちません）。
//! キーの更新時は TTL を待たずに必ず [`CredentialCache::invalidate`] されます。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::CredentialError;
use crate::provider::Provider;

/// キャッシュの既定 TTL（5 分）
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// プロバイダーごとの API キー
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
}

impl ApiKeys {
    fn slot(&self, provider: Provider) -> &Option<String> {
        match provider {
            Provider::OpenAi => &self.openai_api_key,
            Provider::Google => &self.google_api_key,
            Provider::Anthropic => &self.anthropic_api_key,
        }
    }

    fn slot_mut(&mut self, provider: Provider) -> &mut Option<String> {
        match provider {
            Provider::OpenAi => &mut self.openai_api_key,
            Provider::Google => &mut self.google_api_key,
            Provider::Anthropic => &mut self.anthropic_api_key,
        }
    }

    /// 空でないキー
    pub fn get(&self, provider: Provider) -> Option<&str> {
        self.slot(provider)
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn set(&mut self, provider: Provider, key: Option<String>) {
        *self.slot_mut(provider) = key;
    }

    /// `other` に値があるキーだけを上書きする。空文字列はキーの削除
    pub fn merge(&mut self, other: ApiKeys) {
        for provider in Provider::ALL {
            if let Some(value) = other.slot(provider).clone() {
                let value = Some(value).filter(|v| !v.trim().is_empty());
                self.set(provider, value);
            }
        }
    }

    /// 設定キー名 → マスク済みの値
    pub fn masked(&self) -> BTreeMap<&'static str, Option<String>> {
        Provider::ALL
            .into_iter()
            .map(|provider| (provider.credential_key(), self.get(provider).map(mask_secret)))
            .collect()
    }
}

/// 秘密値を `****` + 末尾 4 文字に置き換える
///
/// ```rust
/// use stepchain::credentials::mask_secret;
///
/// assert_eq!(mask_secret("sk-abcdef123456"), "****3456");
/// assert_eq!(mask_secret("abc"), "****");
/// ```
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// API キーの解決
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// プロバイダーの API キー。未設定なら `None`
    async fn resolve(&self, provider: Provider) -> Option<String>;
}

/// API キーの保存先
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// 現在有効なキーをすべて読み込む
    async fn load(&self) -> Result<ApiKeys, CredentialError>;

    /// 指定されたキーを追加・更新する
    async fn upsert(&self, changes: ApiKeys) -> Result<(), CredentialError>;
}

/// TOML 設定ファイル
///
/// ```toml
/// openai_api_key = "sk-..."
/// google_api_key = "..."
/// anthropic_api_key = "sk-ant-..."
/// ```
///
/// ファイルに無いキーは環境変数（`OPENAI_API_KEY` など）で補います。
#[derive(Debug)]
pub struct SettingsFile {
    path: PathBuf,
    env_fallback: bool,
    write_lock: tokio::sync::Mutex<()>,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_fallback: true,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 環境変数による補完を無効にする
    pub fn without_env_fallback(mut self) -> Self {
        self.env_fallback = false;
        self
    }

    /// ファイルの内容だけを読み込む（ファイルが無ければ空）
    async fn read_file(&self) -> Result<ApiKeys, CredentialError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ApiKeys::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CredentialSource for SettingsFile {
    async fn load(&self) -> Result<ApiKeys, CredentialError> {
        let mut keys = self.read_file().await?;
        if self.env_fallback {
            for provider in Provider::ALL {
                if keys.get(provider).is_none() {
                    let from_env = std::env::var(provider.env_var())
                        .ok()
                        .filter(|v| !v.trim().is_empty());
                    keys.set(provider, from_env);
                }
            }
        }
        Ok(keys)
    }

    async fn upsert(&self, changes: ApiKeys) -> Result<(), CredentialError> {
        let _guard = self.write_lock.lock().await;
        let mut keys = self.read_file().await?;
        keys.merge(changes);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = toml::to_string(&keys)?;
        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// メモリ上の固定キー（テストや組み込み用途）
#[derive(Debug, Default)]
pub struct StaticCredentials {
    keys: StdRwLock<ApiKeys>,
}

impl StaticCredentials {
    pub fn new(keys: ApiKeys) -> Self {
        Self {
            keys: StdRwLock::new(keys),
        }
    }

    /// 1 プロバイダーだけキーを持つ
    pub fn single(provider: Provider, key: impl Into<String>) -> Self {
        let mut keys = ApiKeys::default();
        keys.set(provider, Some(key.into()));
        Self::new(keys)
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn load(&self) -> Result<ApiKeys, CredentialError> {
        Ok(self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn upsert(&self, changes: ApiKeys) -> Result<(), CredentialError> {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(changes);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Cached {
    keys: ApiKeys,
    loaded_at: Instant,
}

/// TTL と明示的な無効化を持つ API キーキャッシュ
pub struct CredentialCache {
    source: Arc<dyn CredentialSource>,
    ttl: Duration,
    cached: RwLock<Option<Cached>>,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self::with_ttl(source, DEFAULT_TTL)
    }

    pub fn with_ttl(source: Arc<dyn CredentialSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// 現在のキー一式
    ///
    /// キャッシュが無いか期限切れなら保存先から読み直します。
    /// 読み込みに失敗した場合はログに残し、空のキー一式を返します（キャッシュはしない）。
    pub async fn current(&self) -> ApiKeys {
        if let Some(keys) = self.fresh(self.cached.read().await.as_ref()) {
            return keys;
        }

        let mut slot = self.cached.write().await;
        if let Some(keys) = self.fresh(slot.as_ref()) {
            return keys;
        }

        match self.source.load().await {
            Ok(keys) => {
                info!("API キーを読み込みました");
                *slot = Some(Cached {
                    keys: keys.clone(),
                    loaded_at: Instant::now(),
                });
                keys
            }
            Err(e) => {
                error!(error = %e, "API キーの読み込みに失敗しました");
                ApiKeys::default()
            }
        }
    }

    fn fresh(&self, cached: Option<&Cached>) -> Option<ApiKeys> {
        cached
            .filter(|cached| cached.loaded_at.elapsed() < self.ttl)
            .map(|cached| cached.keys.clone())
    }

    /// キャッシュを破棄する
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        info!("API キーのキャッシュを無効化しました");
    }

    /// キーを更新し、キャッシュを無効化する
    pub async fn upsert(&self, changes: ApiKeys) -> Result<(), CredentialError> {
        self.source.upsert(changes).await?;
        self.invalidate().await;
        Ok(())
    }
}

#[async_trait]
impl CredentialResolver for CredentialCache {
    async fn resolve(&self, provider: Provider) -> Option<String> {
        self.current().await.get(provider).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 読み込み回数を数えるソース
    struct CountingSource {
        inner: StaticCredentials,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSource for CountingSource {
        async fn load(&self) -> Result<ApiKeys, CredentialError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load().await
        }

        async fn upsert(&self, changes: ApiKeys) -> Result<(), CredentialError> {
            self.inner.upsert(changes).await
        }
    }

    fn counting(provider: Provider, key: &str) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            inner: StaticCredentials::single(provider, key),
            loads: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-1234567890"), "****7890");
        assert_eq!(mask_secret("1234"), "****");
        assert_eq!(mask_secret(""), "****");
        assert_eq!(mask_secret("鍵鍵鍵鍵鍵"), "****鍵鍵鍵鍵");
    }

    #[test]
    fn test_masked_view() {
        let mut keys = ApiKeys::default();
        keys.set(Provider::Google, Some("AIzaSyABCDEF".to_string()));
        let masked = keys.masked();

        assert_eq!(masked["google_api_key"].as_deref(), Some("****CDEF"));
        assert_eq!(masked["openai_api_key"], None);
        assert_eq!(masked.len(), 3);
    }

    #[test]
    fn test_merge_and_delete() {
        let mut keys = ApiKeys::default();
        keys.set(Provider::OpenAi, Some("old".to_string()));
        keys.set(Provider::Anthropic, Some("keep".to_string()));

        keys.merge(ApiKeys {
            openai_api_key: Some("new".to_string()),
            google_api_key: None,
            anthropic_api_key: None,
        });
        assert_eq!(keys.get(Provider::OpenAi), Some("new"));
        assert_eq!(keys.get(Provider::Anthropic), Some("keep"));

        keys.merge(ApiKeys {
            openai_api_key: Some(String::new()),
            ..ApiKeys::default()
        });
        assert_eq!(keys.get(Provider::OpenAi), None);
    }

    #[tokio::test]
    async fn test_cache_hits_within_ttl() {
        let source = counting(Provider::OpenAi, "sk-a");
        let cache = CredentialCache::new(source.clone());

        assert_eq!(cache.resolve(Provider::OpenAi).await.as_deref(), Some("sk-a"));
        assert_eq!(cache.resolve(Provider::OpenAi).await.as_deref(), Some("sk-a"));
        assert_eq!(cache.resolve(Provider::Google).await, None);
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let source = counting(Provider::OpenAi, "sk-a");
        let cache = CredentialCache::with_ttl(source.clone(), Duration::ZERO);

        cache.resolve(Provider::OpenAi).await;
        cache.resolve(Provider::OpenAi).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_upsert_invalidates_cache() {
        let source = counting(Provider::OpenAi, "sk-old");
        let cache = CredentialCache::new(source.clone());
        assert_eq!(cache.resolve(Provider::OpenAi).await.as_deref(), Some("sk-old"));

        cache
            .upsert(ApiKeys {
                openai_api_key: Some("sk-new".to_string()),
                ..ApiKeys::default()
            })
            .await
            .unwrap();

        assert_eq!(cache.resolve(Provider::OpenAi).await.as_deref(), Some("sk-new"));
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_settings_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsFile::new(dir.path().join("data").join("settings.toml"))
            .without_env_fallback();

        assert_eq!(settings.load().await.unwrap(), ApiKeys::default());

        settings
            .upsert(ApiKeys {
                anthropic_api_key: Some("sk-ant-1".to_string()),
                ..ApiKeys::default()
            })
            .await
            .unwrap();
        settings
            .upsert(ApiKeys {
                google_api_key: Some("g-1".to_string()),
                ..ApiKeys::default()
            })
            .await
            .unwrap();

        let keys = settings.load().await.unwrap();
        assert_eq!(keys.get(Provider::Anthropic), Some("sk-ant-1"));
        assert_eq!(keys.get(Provider::Google), Some("g-1"));
        assert_eq!(keys.get(Provider::OpenAi), None);
    }

    #[tokio::test]
    async fn test_settings_file_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "openai_api_key = ").unwrap();

        let settings = SettingsFile::new(&path).without_env_fallback();
        assert!(matches!(
            settings.load().await,
            Err(CredentialError::Parse(_))
        ));
    }
}
