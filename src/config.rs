use std::env;
use std::path::{Path, PathBuf};

use crate::odds::TeamNamePolicy;
use crate::train::{DEFAULT_L2, DEFAULT_MAX_ITERS, DEFAULT_VALIDATION_SHARE, TrainOptions};

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_MODEL_PATH: &str = "model/football_predictor.json";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub feature_table: PathBuf,
    pub model_path: PathBuf,
    pub team_names: TeamNamePolicy,
    pub train: TrainOptions,
}

impl PipelineConfig {
    /// Reads `LIGA_*` variables; `.env.local` and `.env` are loaded first.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");

        let data_dir = env_path("LIGA_DATA_DIR").unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let feature_table =
            env_path("LIGA_FEATURE_TABLE").unwrap_or_else(|| default_feature_table(&data_dir));
        let model_path =
            env_path("LIGA_MODEL_PATH").unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));
        let team_names = if env_bool("LIGA_STRICT_TEAM_NAMES", false) {
            TeamNamePolicy::Fail
        } else {
            TeamNamePolicy::Drop
        };
        let train = TrainOptions {
            l2: env_parse("LIGA_TRAIN_L2")
                .unwrap_or(DEFAULT_L2)
                .clamp(0.0, 10.0),
            max_iters: env_parse("LIGA_TRAIN_MAX_ITERS")
                .unwrap_or(DEFAULT_MAX_ITERS)
                .clamp(1, 100_000),
            validation_share: env_parse("LIGA_TRAIN_VALIDATION_SHARE")
                .unwrap_or(DEFAULT_VALIDATION_SHARE)
                .clamp(0.0, 0.5),
        };

        Self {
            data_dir,
            feature_table,
            model_path,
            team_names,
            train,
        }
    }

    /// Points the data directory elsewhere; the feature table follows unless
    /// it was set on its own.
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        if self.feature_table == default_feature_table(&self.data_dir) {
            self.feature_table = default_feature_table(&data_dir);
        }
        self.data_dir = data_dir;
        self
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw_files")
    }

    pub fn odds_dir(&self) -> PathBuf {
        self.raw_dir().join("cuotas")
    }

    pub fn matches_path(&self) -> PathBuf {
        self.raw_dir().join("datos_generales_fx.csv")
    }

    pub fn statistics_path(&self) -> PathBuf {
        self.raw_dir().join("df_estadisticas.csv")
    }

    pub fn lineups_path(&self) -> PathBuf {
        self.raw_dir().join("datos_alineaciones.csv")
    }

    pub fn injuries_path(&self) -> PathBuf {
        self.raw_dir().join("datos_lesionados.csv")
    }

    pub fn team_dictionary_path(&self) -> PathBuf {
        self.raw_dir().join("df_dicc_equipos.csv")
    }

    pub fn player_dictionary_path(&self) -> PathBuf {
        self.raw_dir().join("df_diccionario_jugadores.csv")
    }
}

fn default_feature_table(data_dir: &Path) -> PathBuf {
    data_dir
        .join("processed_files")
        .join("df_datos_completos.csv")
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| {
            let t = v.trim().to_ascii_lowercase();
            !(t.is_empty() || t == "0" || t == "false" || t == "off" || t == "no")
        })
        .unwrap_or(default)
}
