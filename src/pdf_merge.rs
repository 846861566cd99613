//! Page-level PDF merge (spec §4.3 "Merge cycle" step 3), grounded on a
//! sibling PDF-ingest service's `merge_documents` (object renumbering,
//! catalog/pages-tree splice via `lopdf`), extended with per-page hash
//! dedup.

use std::collections::BTreeMap;
use std::path::Path;

use lopdf::{Bookmark, Document, Object, ObjectId};
use sha1::{Digest, Sha1};

use crate::error::MergeError;

/// Merges `sources` (in the caller-decided order) into a single PDF byte
/// stream. When `dedup` is set, a page whose decoded content stream hashes
/// the same as one already written is dropped.
pub fn merge_documents(sources: &[&Path], dedup: bool) -> Result<Vec<u8>, MergeError> {
    let mut documents = Vec::with_capacity(sources.len());
    for path in sources {
        let doc = Document::load(path).map_err(|e| MergeError::InvalidInput {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        documents.push(doc);
    }

    let mut max_id = 1;
    let mut pagenum = 1;
    let mut documents_pages = BTreeMap::new();
    let mut documents_objects = BTreeMap::new();
    let mut merged = Document::with_version("1.5");
    let mut seen_hashes = std::collections::HashSet::new();

    for mut doc in documents {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for (_, object_id) in doc.get_pages() {
            if dedup {
                let fingerprint = page_fingerprint(&doc, object_id);
                if !seen_hashes.insert(fingerprint) {
                    continue;
                }
            }
            let bookmark = Bookmark::new(format!("Page_{pagenum}"), [0.0, 0.0, 1.0], 0, object_id);
            merged.add_bookmark(bookmark, None);
            pagenum += 1;
            if let Some(object) = doc.get_object(object_id).ok().cloned() {
                documents_pages.insert(object_id, object);
            }
        }

        documents_objects.extend(doc.objects);
    }

    if documents_pages.is_empty() {
        return Err(MergeError::Empty);
    }

    let mut catalog_object: Option<(ObjectId, Object)> = None;
    let mut pages_object: Option<(ObjectId, Object)> = None;

    for (object_id, object) in documents_objects.iter() {
        match object.type_name().unwrap_or(b"") {
            b"Catalog" => {
                catalog_object = Some((catalog_object.map(|c| c.0).unwrap_or(*object_id), object.clone()));
            }
            b"Pages" => {
                if let Ok(dictionary) = object.as_dict() {
                    let mut dictionary = dictionary.clone();
                    if let Some((_, ref prior)) = pages_object {
                        if let Ok(old) = prior.as_dict() {
                            dictionary.extend(old);
                        }
                    }
                    pages_object = Some((pages_object.map(|p| p.0).unwrap_or(*object_id), Object::Dictionary(dictionary)));
                }
            }
            b"Page" | b"Outlines" | b"Outline" => {}
            _ => {
                merged.objects.insert(*object_id, object.clone());
            }
        }
    }

    let (pages_id, pages_obj) = pages_object.ok_or(MergeError::Empty)?;
    let (catalog_id, catalog_obj) = catalog_object.ok_or(MergeError::Empty)?;

    if let Ok(dictionary) = pages_obj.as_dict() {
        let mut dictionary = dictionary.clone();
        dictionary.set("Count", documents_pages.len() as u32);
        dictionary.set("Kids", documents_pages.keys().map(|id| Object::Reference(*id)).collect::<Vec<_>>());
        merged.objects.insert(pages_id, Object::Dictionary(dictionary));
    }

    for (object_id, object) in documents_pages.into_iter() {
        if let Ok(dictionary) = object.as_dict() {
            let mut dictionary = dictionary.clone();
            dictionary.set("Parent", pages_id);
            merged.objects.insert(object_id, Object::Dictionary(dictionary));
        }
    }

    if let Ok(dictionary) = catalog_obj.as_dict() {
        let mut dictionary = dictionary.clone();
        dictionary.set("Pages", pages_id);
        dictionary.remove(b"Outlines");
        merged.objects.insert(catalog_id, Object::Dictionary(dictionary));
    }

    merged.trailer.set("Root", catalog_id);
    merged.max_id = merged.objects.len() as u32;
    merged.renumber_objects();
    merged.adjust_zero_pages();

    if let Some(n) = merged.build_outline() {
        if let Ok(Object::Dictionary(dict)) = merged.get_object_mut(catalog_id) {
            dict.set("Outlines", Object::Reference(n));
        }
    }

    merged.compress();
    let mut buf = Vec::new();
    merged.save_to(&mut buf)?;
    Ok(buf)
}

/// Content-stream hash used for page-level dedup. Falls back to hashing the
/// raw page dictionary bytes if the content stream can't be decoded.
fn page_fingerprint(doc: &Document, page_id: ObjectId) -> String {
    let mut hasher = Sha1::new();
    match doc.get_page_content(page_id) {
        Ok(bytes) => hasher.update(&bytes),
        Err(_) => {
            if let Ok(obj) = doc.get_object(page_id) {
                hasher.update(format!("{obj:?}").as_bytes());
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-1 of a whole file, used both for the uploader's idempotency key and
/// for identifying byte-identical source files upstream of page dedup.
pub fn file_sha1(path: &Path) -> Result<String, MergeError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_page_pdf(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(lopdf::dictionary! {
                "Type" => "Pages",
                "Count" => 1,
                "Kids" => vec![Object::Reference(page_id)],
            }),
        );
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(&path).unwrap();
        path
    }

    #[test]
    fn merges_two_single_page_documents_into_two_pages() {
        let dir = tempfile::tempdir().unwrap();
        let a = single_page_pdf(dir.path(), "a.pdf");
        let b = single_page_pdf(dir.path(), "b.pdf");
        let bytes = merge_documents(&[&a, &b], true).unwrap();
        let merged = Document::load_mem(&bytes).unwrap();
        assert_eq!(merged.get_pages().len(), 2);
    }

    #[test]
    fn file_sha1_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bin");
        std::fs::write(&path, b"hello").unwrap();
        let h1 = file_sha1(&path).unwrap();
        let h2 = file_sha1(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 40);
    }
}
