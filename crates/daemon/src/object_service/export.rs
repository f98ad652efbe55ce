use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use tokio_util::io::SyncIoBridge;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use common::label::ShareType;
use common::prelude::{Acm, Caller, Capabilities, FileKey, Object};

use super::read::{ContentHandle, ContentStream};
use super::types::{ZipRequest, FOLDER_TYPE};
use super::{ObjectError, ObjectService};

/// Trailing entry listing every file that made it into the archive.
pub const MANIFEST_NAME: &str = "classification_manifest.txt";

const COPY_CHUNK: usize = 64 * 1024;

/// A finished archive spooled to an anonymous temp file, rewound to the start.
#[derive(Debug)]
pub struct ZipExport {
    pub file_name: String,
    pub disposition: String,
    pub length: u64,
    /// Entry names in archive order, manifest excluded.
    pub entries: Vec<String>,
    pub file: tokio::fs::File,
}

fn entry_options() -> FileOptions<()> {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

/// Archive-safe, unique entry name for `name`.
fn unique_name(taken: &mut HashSet<String>, name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') || c.is_control() { '_' } else { c })
        .collect();
    let cleaned = match cleaned.trim() {
        "" => fallback.to_string(),
        trimmed => trimmed.to_string(),
    };
    if taken.insert(cleaned.clone()) {
        return cleaned;
    }

    let (stem, ext) = match cleaned.rfind('.') {
        Some(dot) if dot > 0 => cleaned.split_at(dot),
        _ => (cleaned.as_str(), ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Copy one entry's plaintext into the archive chunk by chunk.
///
/// A content stream that fails or ends short of `length` has its partial
/// entry removed, and the read error comes back next to the writer so the
/// export can carry on. Archive write errors fail the export.
async fn write_entry(
    mut zip: ZipWriter<File>,
    name: String,
    content: ContentStream,
    length: u64,
) -> Result<(ZipWriter<File>, io::Result<u64>), ObjectError> {
    let mut source = SyncIoBridge::new(content);
    tokio::task::spawn_blocking(move || {
        zip.start_file(name, entry_options())?;
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;
        let outcome = loop {
            match source.read(&mut buf) {
                Ok(0) if copied == length => break Ok(copied),
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("content ended after {copied} of {length} bytes"),
                    ))
                }
                Ok(n) => {
                    zip.write_all(&buf[..n])?;
                    copied += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        if outcome.is_err() {
            zip.abort_file()?;
        }
        Ok::<_, ObjectError>((zip, outcome))
    })
    .await
    .map_err(io::Error::other)?
}

impl ObjectService {
    /// Bundle several files into one ZIP with a classification manifest.
    ///
    /// Every id is authorized before anything is written: one denied id
    /// fails the whole request. Duplicate ids are exported once and folders
    /// are skipped.
    pub async fn zip_export(
        &self,
        caller: &Caller,
        request: ZipRequest,
    ) -> Result<ZipExport, ObjectError> {
        if request.object_ids.is_empty() {
            return Err(ObjectError::BadRequest("no objects requested".to_string()));
        }

        let mut seen = HashSet::new();
        let mut selected: Vec<(Object, FileKey)> = Vec::new();
        {
            let mut conn = self.inner.db.acquire().await?;
            for id in request.object_ids.iter().copied() {
                if !seen.insert(id) {
                    continue;
                }
                let (object, rows) = self.load(&mut conn, id).await?;
                Self::ensure_live(&object)?;
                self.authorize(caller, &object, &rows, Capabilities::READ)
                    .await?;
                if object.type_name == FOLDER_TYPE {
                    continue;
                }
                let key = caller.file_key(self.master(), &rows, Capabilities::READ)?;
                selected.push((object, key));
            }
        }

        let acms: Vec<Acm> = selected.iter().map(|(o, _)| o.acm.clone()).collect();
        let rolled = self
            .labels()
            .rollup(&caller.dn, &acms, ShareType::Intersection)
            .await?;
        let banner = rolled
            .banner()
            .or_else(|| rolled.classification())
            .unwrap_or_default()
            .to_string();

        let mut taken: HashSet<String> = [MANIFEST_NAME.to_string()].into_iter().collect();
        let mut zip = ZipWriter::new(tempfile::tempfile()?);
        let mut entries = Vec::with_capacity(selected.len());
        let mut manifest = vec![banner, String::new()];

        for (object, key) in selected {
            let portion = object
                .acm
                .portion()
                .or_else(|| object.acm.classification())
                .unwrap_or_default()
                .to_string();
            let fallback = object.id.to_string();
            let requested = object.name.clone();
            let handle = ContentHandle::current(object, key);

            let object_id = handle.object_id;
            let length = handle.length;
            let name = unique_name(&mut taken, &requested, &fallback);
            let content = self.stream_range(handle, 0, length);
            let (next, copied) = write_entry(zip, name.clone(), content, length).await?;
            zip = next;
            if let Err(e) = copied {
                tracing::warn!(object_id = %object_id, error = %e, "skipping zip entry");
                taken.remove(&name);
                continue;
            }
            manifest.push(format!("({portion}) {name}"));
            entries.push(name);
        }

        let manifest = manifest.join("\n") + "\n";
        let (file, length) = tokio::task::spawn_blocking(move || {
            zip.start_file(MANIFEST_NAME, entry_options())?;
            zip.write_all(manifest.as_bytes())?;
            let mut file = zip.finish()?;
            let length = file.seek(SeekFrom::End(0))?;
            file.seek(SeekFrom::Start(0))?;
            Ok::<_, ObjectError>((file, length))
        })
        .await
        .map_err(io::Error::other)??;

        tracing::info!(
            actor = %caller.dn,
            entries = entries.len(),
            length,
            "zip export built"
        );
        Ok(ZipExport {
            file_name: request.file_name,
            disposition: request.disposition,
            length,
            entries,
            file: tokio::fs::File::from_std(file),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use tokio::io::AsyncReadExt;
    use uuid::Uuid;

    use super::*;
    use crate::object_service::testkit::{harness, unclassified, ALICE, BOB};
    use crate::object_service::{ObjectMetadata, ObjectShare};

    #[test]
    fn test_unique_names() {
        let mut taken = HashSet::new();
        assert_eq!(unique_name(&mut taken, "a.txt", "x"), "a.txt");
        assert_eq!(unique_name(&mut taken, "a.txt", "x"), "a (1).txt");
        assert_eq!(unique_name(&mut taken, "a.txt", "x"), "a (2).txt");
        assert_eq!(unique_name(&mut taken, "dir/b", "x"), "dir_b");
        assert_eq!(unique_name(&mut taken, " ", "fallback"), "fallback");
        assert_eq!(unique_name(&mut taken, ".env", "x"), ".env");
        assert_eq!(unique_name(&mut taken, ".env", "x"), ".env (1)");
    }

    #[tokio::test]
    async fn test_zip_dedups_and_appends_manifest() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let mut one: &[u8] = b"first file";
        let mut two: &[u8] = b"second file";
        let id1 = h
            .service
            .create_object(&alice, ObjectMetadata::new("one.txt", unclassified()), Some(&mut one))
            .await
            .unwrap()
            .object
            .id;
        let id2 = h
            .service
            .create_object(&alice, ObjectMetadata::new("two.txt", unclassified()), Some(&mut two))
            .await
            .unwrap()
            .object
            .id;

        let mut export = h
            .service
            .zip_export(
                &alice,
                ZipRequest {
                    object_ids: vec![id1, id2, id2],
                    file_name: "bundle.zip".into(),
                    disposition: "attachment".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(export.entries, vec!["one.txt", "two.txt"]);

        let mut bytes = Vec::new();
        export.file.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes.len() as u64, export.length);

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        let mut content = String::new();
        archive
            .by_name("two.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "second file");

        let mut manifest = String::new();
        archive
            .by_name(MANIFEST_NAME)
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        assert!(manifest.starts_with("UNCLASSIFIED\n"));
        assert!(manifest.contains("(U) one.txt"));
        assert!(manifest.contains("(U) two.txt"));
    }

    #[tokio::test]
    async fn test_one_denied_id_fails_everything() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let bob = h.caller(BOB).await;
        let mut body: &[u8] = b"x";
        let open = h
            .service
            .create_object(&alice, ObjectMetadata::new("open", unclassified()), Some(&mut body))
            .await
            .unwrap();
        let mut body: &[u8] = b"y";
        let closed = h
            .service
            .create_object(&alice, ObjectMetadata::new("closed", unclassified()), Some(&mut body))
            .await
            .unwrap();
        h.service
            .add_share(
                &alice,
                closed.object.id,
                ObjectShare {
                    grantee: alice.resource(),
                    capabilities: Capabilities::READ,
                },
            )
            .await
            .unwrap();

        let request = |ids| ZipRequest {
            object_ids: ids,
            file_name: "z.zip".into(),
            disposition: "attachment".into(),
        };
        let err = h
            .service
            .zip_export(&bob, request(vec![open.object.id, closed.object.id]))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectError::PermissionDenied(_)));

        let err = h
            .service
            .zip_export(&bob, request(vec![Uuid::new_v4()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_short_content_is_left_out() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let mut body: &[u8] = b"this body gets truncated";
        let broken = h
            .service
            .create_object(&alice, ObjectMetadata::new("broken.txt", unclassified()), Some(&mut body))
            .await
            .unwrap()
            .object
            .id;
        for entry in std::fs::read_dir(h.service.cache().dir()).unwrap() {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .open(entry.unwrap().path())
                .unwrap();
            file.set_len(4).unwrap();
        }

        // spans several copy chunks
        let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = big.as_slice();
        let whole = h
            .service
            .create_object(&alice, ObjectMetadata::new("whole.bin", unclassified()), Some(&mut reader))
            .await
            .unwrap()
            .object
            .id;

        let mut export = h
            .service
            .zip_export(
                &alice,
                ZipRequest {
                    object_ids: vec![broken, whole],
                    file_name: "bundle.zip".into(),
                    disposition: "attachment".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(export.entries, vec!["whole.bin"]);

        let mut bytes = Vec::new();
        export.file.read_to_end(&mut bytes).await.unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.by_name("broken.txt").is_err());

        let mut content = Vec::new();
        archive
            .by_name("whole.bin")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, big);

        let mut manifest = String::new();
        archive
            .by_name(MANIFEST_NAME)
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        assert!(!manifest.contains("broken.txt"));
    }
}
