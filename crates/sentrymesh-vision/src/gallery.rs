//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The face-recognition gallery (spec §3.3): one subdirectory per identity
//! under a root directory, built once at startup by running the face
//! detector over every JPEG and keeping one L2-normalised embedding per
//! accepted image. Candidates below the enrolment threshold are renamed
//! `.bak` and skipped (spec §8 scenario 6).

use crate::backend::InferenceBackend;
use anyhow::{Context, Result};
use log::{info, warn};
use sentrymesh_core::FaceCategory;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct GalleryIdentity {
    pub embeddings: Vec<Vec<f32>>,
    pub category: FaceCategory,
}

#[derive(Clone, Debug, Default)]
pub struct Gallery {
    identities: HashMap<String, GalleryIdentity>,
}

impl Gallery {
    pub fn identities(&self) -> impl Iterator<Item = (&str, &GalleryIdentity)> {
        self.identities.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Walks `root` — one subdirectory per identity, JPEGs inside — and
    /// builds the gallery (spec §3.3). `categories` maps identity name to
    /// its category; identities absent from the map default to `Unknown`'s
    /// complement, `Authorised` (a gallery only ever holds known people).
    pub fn build(
        root: &Path,
        backend: &mut dyn InferenceBackend,
        enrolment_confidence_threshold: f32,
        categories: &HashMap<String, FaceCategory>,
    ) -> Result<Self> {
        let mut identities = HashMap::new();

        let entries = fs::read_dir(root)
            .with_context(|| format!("reading gallery root {}", root.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let identity_name = entry.file_name().to_string_lossy().into_owned();
            let category = categories
                .get(&identity_name)
                .copied()
                .unwrap_or(FaceCategory::Authorised);

            let mut embeddings = Vec::new();
            for image_entry in fs::read_dir(entry.path())? {
                let image_entry = image_entry?;
                let path = image_entry.path();
                if !is_jpeg(&path) {
                    continue;
                }
                match enrol_one(&path, backend, enrolment_confidence_threshold)? {
                    Some(embedding) => embeddings.push(embedding),
                    None => rename_bak(&path)?,
                }
            }

            if embeddings.is_empty() {
                warn!("gallery identity '{identity_name}' has no accepted embeddings");
                continue;
            }
            info!(
                "gallery identity '{identity_name}': {} embedding(s), category {:?}",
                embeddings.len(),
                category
            );
            identities.insert(identity_name, GalleryIdentity { embeddings, category });
        }

        Ok(Self { identities })
    }

    /// Cosine-compares `embedding` against every embedding of every
    /// identity, keeping the overall best (spec §4.4 "Face Recognizer
    /// (SFace)").
    pub fn best_match(&self, embedding: &[f32]) -> Option<(&str, &GalleryIdentity, f32)> {
        let mut best: Option<(&str, &GalleryIdentity, f32)> = None;
        for (name, identity) in &self.identities {
            for candidate in &identity.embeddings {
                let score = cosine_similarity(embedding, candidate);
                if best.as_ref().map(|(_, _, b)| score > *b).unwrap_or(true) {
                    best = Some((name.as_str(), identity, score));
                }
            }
        }
        best
    }
}

fn is_jpeg(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
        Some(ext) if ext == "jpg" || ext == "jpeg"
    )
}

fn enrol_one(
    path: &Path,
    backend: &mut dyn InferenceBackend,
    enrolment_confidence_threshold: f32,
) -> Result<Option<Vec<f32>>> {
    let img = image::open(path)
        .with_context(|| format!("decoding gallery image {}", path.display()))?
        .to_rgb8();
    let (w, h) = img.dimensions();
    let bgr: Vec<u8> = img.pixels().flat_map(|p| [p.0[2], p.0[1], p.0[0]]).collect();

    let faces = backend.detect_faces(&bgr, w, h, enrolment_confidence_threshold)?;
    let Some(best_face) = faces
        .iter()
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
    else {
        return Ok(None);
    };
    if best_face.confidence < enrolment_confidence_threshold {
        return Ok(None);
    }

    let embedding = backend.embed_face(&bgr, w, h)?;
    Ok(Some(l2_normalise(&embedding.0)))
}

fn rename_bak(path: &Path) -> Result<()> {
    let mut renamed: PathBuf = path.to_path_buf();
    renamed.set_extension(format!(
        "{}.bak",
        path.extension().and_then(|e| e.to_str()).unwrap_or("jpg")
    ));
    fs::rename(path, &renamed)
        .with_context(|| format!("renaming rejected gallery image {}", path.display()))?;
    Ok(())
}

pub fn l2_normalise(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalise_produces_unit_vector() {
        let v = l2_normalise(&[3.0, 4.0]);
        let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }
}
