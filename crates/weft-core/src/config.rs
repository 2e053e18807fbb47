//! Settings - 環境変数からの設定
//!
//! | 変数 | 既定値 |
//! |---|---|
//! | `WEFT_REDIS_URL` | `redis://127.0.0.1:6379` |
//! | `WEFT_SCOPE` | `x` |
//! | `WEFT_STAGE` | `x` |
//! | `WEFT_OPERATOR` | なし |
//! | `WEFT_STORE_ROOT` | `/tmp/weft` |
//! | `WEFT_STORE_PORT` | `777` |
//! | `WEFT_MACHINE_ID` | ホスト名 |
//! | `WEFT_WORKER_ID` | machine id から導出 |
//! | `WEFT_S3_BUCKET` | なし（指定するとファイルシステムの代わりにバケットへ書く） |
//! | `WEFT_S3_ENDPOINT` | なし（MinIO など S3 互換のエンドポイント） |

use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::errors::WeftError;
use crate::domain::operator_ref::OperatorRef;
use crate::impls::DEFAULT_STORE_PORT;
use crate::ports::{MachineIdentifier, StaticMachineId};
use crate::ports::id_generator::MAX_WORKER_ID;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub redis_url: String,
    /// このレプリカが担当する run の名前空間
    pub scope: String,
    /// このレプリカが担当するステージ
    pub stage: String,
    pub operator: Option<OperatorRef>,
    pub store_root: PathBuf,
    pub store_port: u16,
    pub machine_id: String,
    pub worker_id: u16,
    pub s3_bucket: Option<String>,
    pub s3_endpoint: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, WeftError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `lookup` から設定を読む（テストでは HashMap を渡す）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WeftError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let machine_id = match get("WEFT_MACHINE_ID") {
            Some(id) => id,
            None => StaticMachineId::from_hostname()
                .map_err(|e| config_error("WEFT_MACHINE_ID", e))?
                .machine_id()
                .to_string(),
        };
        let worker_id = match get("WEFT_WORKER_ID") {
            Some(raw) => {
                let id: u16 = parse("WEFT_WORKER_ID", &raw)?;
                if id > MAX_WORKER_ID {
                    return Err(config_error(
                        "WEFT_WORKER_ID",
                        format!("{id} exceeds {MAX_WORKER_ID}"),
                    ));
                }
                id
            }
            None => worker_id_for(&machine_id),
        };

        Ok(Self {
            redis_url: get("WEFT_REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into()),
            scope: get("WEFT_SCOPE").unwrap_or_else(|| "x".into()),
            stage: get("WEFT_STAGE").unwrap_or_else(|| "x".into()),
            operator: get("WEFT_OPERATOR")
                .map(|raw| parse("WEFT_OPERATOR", &raw))
                .transpose()?,
            store_root: get("WEFT_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/weft")),
            store_port: get("WEFT_STORE_PORT")
                .map(|raw| parse("WEFT_STORE_PORT", &raw))
                .transpose()?
                .unwrap_or(DEFAULT_STORE_PORT),
            machine_id,
            worker_id,
            s3_bucket: get("WEFT_S3_BUCKET"),
            s3_endpoint: get("WEFT_S3_ENDPOINT"),
        })
    }
}

fn config_error(key: &str, reason: impl ToString) -> WeftError {
    WeftError::Config {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, WeftError>
where
    T: FromStr,
    T::Err: ToString,
{
    raw.trim().parse().map_err(|e: T::Err| config_error(key, e))
}

/// machine id から snowflake の worker id（0..=1023）を決める（FNV-1a）
pub fn worker_id_for(machine_id: &str) -> u16 {
    let hash = machine_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
        });
    (hash % (u64::from(MAX_WORKER_ID) + 1)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, WeftError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let s = settings(&[("WEFT_MACHINE_ID", "node-a")]).unwrap();

        assert_eq!(s.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(s.scope, "x");
        assert_eq!(s.stage, "x");
        assert_eq!(s.operator, None);
        assert_eq!(s.store_root, PathBuf::from("/tmp/weft"));
        assert_eq!(s.store_port, 777);
        assert_eq!(s.worker_id, worker_id_for("node-a"));
        assert_eq!(s.s3_bucket, None);
    }

    #[test]
    fn overrides_are_parsed() {
        let s = settings(&[
            ("WEFT_MACHINE_ID", "10.0.0.7"),
            ("WEFT_WORKER_ID", "12"),
            ("WEFT_OPERATOR", "gray:1.2.0"),
            ("WEFT_STORE_PORT", "8777"),
            ("WEFT_SCOPE", "pipelines/img:1.0.0/5"),
            ("WEFT_STAGE", "gray"),
            ("WEFT_S3_BUCKET", "weft-blobs"),
            ("WEFT_S3_ENDPOINT", "http://minio:9000"),
        ])
        .unwrap();

        assert_eq!(s.worker_id, 12);
        assert_eq!(s.operator.unwrap().to_string(), "gray:1.2.0");
        assert_eq!(s.store_port, 8777);
        assert_eq!(s.scope, "pipelines/img:1.0.0/5");
        assert_eq!(s.stage, "gray");
        assert_eq!(s.s3_bucket.as_deref(), Some("weft-blobs"));
        assert_eq!(s.s3_endpoint.as_deref(), Some("http://minio:9000"));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = settings(&[("WEFT_MACHINE_ID", "m"), ("WEFT_STORE_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("WEFT_STORE_PORT"));

        let err = settings(&[("WEFT_MACHINE_ID", "m"), ("WEFT_WORKER_ID", "4096")]).unwrap_err();
        assert!(matches!(err, WeftError::Config { .. }));
    }

    #[test]
    fn worker_id_is_stable_and_in_range() {
        assert_eq!(worker_id_for("node-a"), worker_id_for("node-a"));
        assert!(worker_id_for("some-really-long-hostname.internal") <= MAX_WORKER_ID);
    }
}
