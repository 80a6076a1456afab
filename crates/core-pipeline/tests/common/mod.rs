//! Shared fixtures: a temp project tree with published assets and a
//! pipeline wired to the in-memory backend.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use core_backend::MemoryBackend;
use core_config::ProjectConfig;
use core_pipeline::Pipeline;
use serde_json::json;

pub const EP: &str = "Ep04";
pub const SEQ: &str = "sq0070";
pub const SHOT_A: &str = "SH0170";
pub const SHOT_B: &str = "SH0180";
pub const CAMERA_NAME: &str = "SWA_Ep04_SH0170_camera";

/// Config document whose `projRoot` points at `proj_root` (forward slashes).
pub fn config_doc(proj_root: &str) -> serde_json::Value {
    json!({
        "version": "1.1",
        "project": {"name": "Shadow Wars", "code": "SWA"},
        "roots": {"projRoot": proj_root},
        "staticPaths": {"sceneBase": "all/scene"},
        "templates": {
            "publishPath": "$projRoot/$project/$sceneBase/$ep/$seq/$shot/$dept/publish",
            "assetPath": "$projRoot/$project/$sceneBase/$ep/$seq/$shot/$dept/publish/$ver/$ep_$seq_$shot__$assetType_$assetName_$variant.$ext"
        },
        "patterns": {},
        "tokens": {"dept": {"values": ["anim"]}},
        "shotMetadata": {
            "enabled": true,
            "fieldMapping": {
                "frameRange": {"jsonField": "sequence_frames", "parseFormat": "range"}
            }
        }
    })
}

pub fn shot_root(proj_root: &Path, shot: &str) -> PathBuf {
    proj_root
        .join("SWA/all/scene")
        .join(EP)
        .join(SEQ)
        .join(shot)
}

pub fn publish_dir(proj_root: &Path, shot: &str, dept: &str) -> PathBuf {
    shot_root(proj_root, shot).join(dept).join("publish")
}

/// Creates `publish/v001..v00N` for a shot, each holding the CatStompie
/// alembic; v001 additionally holds the shot camera.
pub fn build_publish_tree(proj_root: &Path, shot: &str, versions: u32) {
    let publish = publish_dir(proj_root, shot, "anim");
    for n in 1..=versions {
        let vdir = publish.join(format!("v{n:03}"));
        fs::create_dir_all(&vdir).unwrap();
        fs::write(
            vdir.join(format!("{EP}_{SEQ}_{shot}__CHAR_CatStompie_001.abc")),
            b"",
        )
        .unwrap();
        if n == 1 && shot == SHOT_A {
            fs::write(vdir.join(format!("{EP}_{SEQ}_{shot}__{CAMERA_NAME}.abc")), b"").unwrap();
        }
    }
}

/// Pipeline over a [`MemoryBackend`] with `projRoot` at `proj_root`.
pub fn pipeline_for(proj_root: &Path) -> Pipeline {
    pipeline_with_backend(proj_root, MemoryBackend::new())
}

pub fn pipeline_with_backend(proj_root: &Path, backend: MemoryBackend) -> Pipeline {
    let doc = config_doc(&proj_root.to_string_lossy().replace('\\', "/"));
    let config = ProjectConfig::from_document(doc, None).unwrap();
    Pipeline::new(config, Box::new(backend)).unwrap()
}
