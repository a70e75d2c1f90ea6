use std::path::{Path, PathBuf};

use tgcm_common::{
    error::{Result, TgcmError},
    types::{ContactId, TagId},
};
use tokio::fs;
use uuid::Uuid;

use crate::types::{Contact, Tag};

#[derive(Debug, Clone)]
pub struct ContactStore {
    contacts_dir: PathBuf,
    tags_dir: PathBuf,
}

impl ContactStore {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let base = data_dir.as_ref().join(".tgcm");
        let contacts_dir = base.join("contacts");
        let tags_dir = base.join("tags");
        fs::create_dir_all(&contacts_dir).await?;
        fs::create_dir_all(&tags_dir).await?;

        Ok(Self {
            contacts_dir,
            tags_dir,
        })
    }

    pub async fn save_contact(&self, contact: &Contact) -> Result<()> {
        let data = serde_json::to_vec_pretty(contact).map_err(|err| {
            TgcmError::Internal(format!("failed to serialize contact {}: {err}", contact.id))
        })?;
        write_atomic(&self.contact_path(contact.id), data).await
    }

    pub async fn delete_contact(&self, id: ContactId) -> Result<()> {
        delete_if_exists(self.contact_path(id)).await
    }

    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        read_all_json::<Contact>(&self.contacts_dir).await
    }

    pub async fn save_tag(&self, tag: &Tag) -> Result<()> {
        let data = serde_json::to_vec_pretty(tag).map_err(|err| {
            TgcmError::Internal(format!("failed to serialize tag {}: {err}", tag.id))
        })?;
        write_atomic(&self.tag_path(tag.id), data).await
    }

    pub async fn delete_tag(&self, id: TagId) -> Result<()> {
        delete_if_exists(self.tag_path(id)).await
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        read_all_json::<Tag>(&self.tags_dir).await
    }

    fn contact_path(&self, id: ContactId) -> PathBuf {
        self.contacts_dir.join(format!("{id}.json"))
    }

    fn tag_path(&self, id: TagId) -> PathBuf {
        self.tags_dir.join(format!("{id}.json"))
    }
}

/// Each write goes through its own temp file, so concurrent writers of one
/// record never interleave bytes.
async fn write_atomic(path: &Path, data: Vec<u8>) -> Result<()> {
    let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    fs::write(&tmp_path, data).await?;
    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }
    Ok(())
}

async fn delete_if_exists(path: PathBuf) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn read_all_json<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut values = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            continue;
        }

        let bytes = fs::read(&path).await?;
        let value = serde_json::from_slice::<T>(&bytes).map_err(|err| {
            TgcmError::Internal(format!("failed to deserialize {}: {err}", path.display()))
        })?;
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use super::ContactStore;
    use crate::types::{Contact, Tag};

    fn contact(id: i64) -> Contact {
        Contact {
            id,
            telegram_id: 1000 + id,
            username: None,
            first_name: None,
            last_name: None,
            display_name: format!("Contact {id}"),
            phone: None,
            bio: None,
            tag_ids: BTreeSet::from([7]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContactStore::new(dir.path()).await.unwrap();

        store.save_contact(&contact(1)).await.unwrap();
        store.save_contact(&contact(2)).await.unwrap();
        store
            .save_tag(&Tag {
                id: 7,
                name: "Work".to_string(),
                color: Some("#FF5733".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut contacts = store.list_contacts().await.unwrap();
        contacts.sort_by_key(|contact| contact.id);
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[1].telegram_id, 1002);
        assert!(contacts[0].tag_ids.contains(&7));

        let tags = store.list_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "Work");
    }

    #[tokio::test]
    async fn deleting_missing_records_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContactStore::new(dir.path()).await.unwrap();

        store.save_contact(&contact(3)).await.unwrap();
        store.delete_contact(3).await.unwrap();
        store.delete_contact(3).await.unwrap();
        store.delete_tag(99).await.unwrap();

        assert!(store.list_contacts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stray_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContactStore::new(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join(".tgcm/tags/notes.txt"), b"hello")
            .await
            .unwrap();

        assert!(store.list_tags().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_of_one_record_stay_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContactStore::new(dir.path()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut record = contact(1);
                record.display_name = format!("name{i}");
                store.save_contact(&record).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let contacts = store.list_contacts().await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].display_name.starts_with("name"));
    }
}
