// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! KITTI-format dumps of detections and tracks.
//!
//! One text file per frame, named `{instance:02}_{source:03}_{frame:06}.txt`,
//! one line per object.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::core::metadata::{DataUnit, FrameMeta, ObjectMeta};

/// Which objects a writer dumps and whether lines carry the track id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KittiKind {
    Detection,
    Tracking,
}

#[derive(Debug, Clone)]
pub struct KittiWriter {
    dir: PathBuf,
    instance: usize,
    kind: KittiKind,
}

impl KittiWriter {
    pub fn new(dir: impl Into<PathBuf>, instance: usize, kind: KittiKind) -> Self {
        Self {
            dir: dir.into(),
            instance,
            kind,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, frame: &FrameMeta) -> PathBuf {
        self.dir.join(format!(
            "{:02}_{:03}_{:06}.txt",
            self.instance, frame.source_id, frame.frame_number
        ))
    }

    /// Write one file per frame of `unit`; returns the number of files written.
    pub fn write_unit(&self, unit: &DataUnit) -> std::io::Result<usize> {
        let mut written = 0;
        for frame in unit.metadata().frames() {
            let mut body = String::new();
            for object in &frame.objects {
                if let Some(line) = self.format_line(object) {
                    body.push_str(&line);
                    body.push('\n');
                }
            }
            let mut file = std::fs::File::create(self.file_path(frame))?;
            file.write_all(body.as_bytes())?;
            written += 1;
        }
        Ok(written)
    }

    /// Untracked objects are left out of tracking dumps.
    pub fn format_line(&self, object: &ObjectMeta) -> Option<String> {
        let bbox = &object.bbox;
        let mut line = object.label.clone();
        if self.kind == KittiKind::Tracking {
            let _ = write!(line, " {}", object.tracking_id?);
        }
        let _ = write!(
            line,
            " 0.0 0 0.0 {:.6} {:.6} {:.6} {:.6} 0.0 0.0 0.0 0.0 0.0 0.0 0.0",
            bbox.left,
            bbox.top,
            bbox.right(),
            bbox.bottom()
        );
        Some(line)
    }
}
