// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod kitti;

pub use kitti::{KittiKind, KittiWriter};
