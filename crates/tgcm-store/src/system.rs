use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
    sync::{
        Arc, RwLock,
        atomic::{AtomicI64, Ordering},
    },
};

use async_trait::async_trait;
use tgcm_common::{
    error::{Result, TgcmError},
    recipients::RecipientResolver,
    time::now,
    types::{ContactId, Recipient, TagId, TelegramId},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    store::ContactStore,
    types::{
        Contact, ContactUpdate, NewContact, NewTag, Tag, TagSummary, TagUpdate, normalize_color,
        normalize_tag_name,
    },
};

pub const MIN_SEARCH_CHARS: usize = 2;

/// Contacts and tags held in memory and mirrored to a [`ContactStore`].
///
/// Mutations run one at a time under `mutations`: each one persists the new
/// record first and only then publishes it to the maps, so readers never see
/// state that is not on disk.
#[derive(Debug, Clone)]
pub struct ContactSys {
    store: ContactStore,
    contacts: Arc<RwLock<HashMap<ContactId, Contact>>>,
    tags: Arc<RwLock<HashMap<TagId, Tag>>>,
    next_contact_id: Arc<AtomicI64>,
    next_tag_id: Arc<AtomicI64>,
    mutations: Arc<Mutex<()>>,
}

impl ContactSys {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let store = ContactStore::new(data_dir).await?;

        let mut contacts = HashMap::new();
        for contact in store.list_contacts().await? {
            contacts.insert(contact.id, contact);
        }

        let mut tags = HashMap::new();
        for tag in store.list_tags().await? {
            tags.insert(tag.id, tag);
        }

        let next_contact_id = contacts.keys().copied().max().unwrap_or(0) + 1;
        let next_tag_id = tags.keys().copied().max().unwrap_or(0) + 1;
        info!(
            contacts = contacts.len(),
            tags = tags.len(),
            "contact store loaded"
        );

        Ok(Self {
            store,
            contacts: Arc::new(RwLock::new(contacts)),
            tags: Arc::new(RwLock::new(tags)),
            next_contact_id: Arc::new(AtomicI64::new(next_contact_id)),
            next_tag_id: Arc::new(AtomicI64::new(next_tag_id)),
            mutations: Arc::new(Mutex::new(())),
        })
    }

    pub async fn create_contact(&self, new: NewContact) -> Result<Contact> {
        new.validate()?;
        let _mutation = self.mutations.lock().await;
        self.insert_contact(new).await
    }

    /// Inserts a contact or refreshes the profile of the one already stored
    /// under the same Telegram id. Tag assignments are preserved. Returns the
    /// stored contact and whether it was newly created.
    pub async fn upsert_contact(&self, new: NewContact) -> Result<(Contact, bool)> {
        new.validate()?;
        let _mutation = self.mutations.lock().await;

        let Some(existing) = self.get_contact_by_telegram_id(new.telegram_id)? else {
            return self.insert_contact(new).await.map(|contact| (contact, true));
        };

        let display_name = new.resolved_display_name();
        let update = ContactUpdate {
            username: new.username,
            first_name: new.first_name,
            last_name: new.last_name,
            display_name: Some(display_name),
            phone: new.phone,
            bio: new.bio,
        };
        self.apply_contact_update(existing, update)
            .await
            .map(|contact| (contact, false))
    }

    pub fn get_contact(&self, id: ContactId) -> Result<Contact> {
        self.contacts_read()?
            .get(&id)
            .cloned()
            .ok_or_else(|| contact_not_found(id))
    }

    pub fn get_contact_by_telegram_id(&self, telegram_id: TelegramId) -> Result<Option<Contact>> {
        Ok(self
            .contacts_read()?
            .values()
            .find(|contact| contact.telegram_id == telegram_id)
            .cloned())
    }

    pub fn list_contacts(&self, limit: Option<usize>, offset: usize) -> Result<Vec<Contact>> {
        let mut contacts: Vec<Contact> = self.contacts_read()?.values().cloned().collect();
        sort_contacts(&mut contacts);
        Ok(paginate(contacts, limit, offset))
    }

    pub fn search_contacts(
        &self,
        query: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Contact>> {
        let needle = query.trim().to_lowercase();
        if needle.chars().count() < MIN_SEARCH_CHARS {
            return Ok(Vec::new());
        }

        let mut contacts: Vec<Contact> = self
            .contacts_read()?
            .values()
            .filter(|contact| contact.matches(&needle))
            .cloned()
            .collect();
        sort_contacts(&mut contacts);
        Ok(paginate(contacts, limit, offset))
    }

    pub async fn update_contact(&self, id: ContactId, update: ContactUpdate) -> Result<Contact> {
        update.validate()?;
        let _mutation = self.mutations.lock().await;
        let contact = self.get_contact(id)?;
        self.apply_contact_update(contact, update).await
    }

    pub async fn delete_contact(&self, id: ContactId) -> Result<()> {
        let _mutation = self.mutations.lock().await;
        if !self.contacts_read()?.contains_key(&id) {
            return Err(contact_not_found(id));
        }

        self.store.delete_contact(id).await?;
        self.contacts_write()?.remove(&id);
        debug!(contact_id = id, "contact deleted");
        Ok(())
    }

    pub async fn create_tag(&self, new: NewTag) -> Result<Tag> {
        let name = normalize_tag_name(&new.name)?;
        let color = new.color.as_deref().map(normalize_color).transpose()?;

        let _mutation = self.mutations.lock().await;
        ensure_unique_name(&*self.tags_read()?, &name, None)?;

        let tag = Tag {
            id: self.next_tag_id.fetch_add(1, Ordering::SeqCst),
            name,
            color,
            created_at: now(),
        };
        self.store.save_tag(&tag).await?;
        self.tags_write()?.insert(tag.id, tag.clone());

        debug!(tag_id = tag.id, name = %tag.name, "tag created");
        Ok(tag)
    }

    pub fn get_tag(&self, id: TagId) -> Result<Tag> {
        self.tags_read()?
            .get(&id)
            .cloned()
            .ok_or_else(|| tag_not_found(id))
    }

    pub fn tag_summary(&self, id: TagId) -> Result<TagSummary> {
        let tag = self.get_tag(id)?;
        let contact_count = self.contact_count(id)?;
        Ok(TagSummary { tag, contact_count })
    }

    pub fn list_tags(&self) -> Result<Vec<TagSummary>> {
        let mut tags: Vec<Tag> = self.tags_read()?.values().cloned().collect();
        tags.sort_by(|left, right| {
            left.name
                .to_lowercase()
                .cmp(&right.name.to_lowercase())
                .then(left.id.cmp(&right.id))
        });

        let contacts = self.contacts_read()?;
        Ok(tags
            .into_iter()
            .map(|tag| {
                let contact_count = contacts
                    .values()
                    .filter(|contact| contact.tag_ids.contains(&tag.id))
                    .count();
                TagSummary { tag, contact_count }
            })
            .collect())
    }

    pub async fn update_tag(&self, id: TagId, update: TagUpdate) -> Result<Tag> {
        let name = update.name.as_deref().map(normalize_tag_name).transpose()?;
        let color = update.color.as_deref().map(normalize_color).transpose()?;

        let _mutation = self.mutations.lock().await;
        let mut tag = self.get_tag(id)?;
        if let Some(name) = name {
            ensure_unique_name(&*self.tags_read()?, &name, Some(id))?;
            tag.name = name;
        }
        if let Some(color) = color {
            tag.color = Some(color);
        }

        self.store.save_tag(&tag).await?;
        self.tags_write()?.insert(tag.id, tag.clone());
        Ok(tag)
    }

    /// Removes the tag and detaches it from every contact carrying it. If any
    /// write fails, contacts already rewritten are restored and nothing is
    /// published.
    pub async fn delete_tag(&self, id: TagId) -> Result<()> {
        let _mutation = self.mutations.lock().await;
        self.get_tag(id)?;

        let originals: Vec<Contact> = self
            .contacts_read()?
            .values()
            .filter(|contact| contact.tag_ids.contains(&id))
            .cloned()
            .collect();

        let mut detached = Vec::with_capacity(originals.len());
        for original in &originals {
            let mut contact = original.clone();
            contact.tag_ids.remove(&id);
            contact.updated_at = now();
            if let Err(err) = self.store.save_contact(&contact).await {
                self.restore_contacts(&originals[..detached.len()]).await;
                return Err(err);
            }
            detached.push(contact);
        }

        if let Err(err) = self.store.delete_tag(id).await {
            self.restore_contacts(&originals).await;
            return Err(err);
        }

        self.tags_write()?.remove(&id);
        {
            let mut contacts = self.contacts_write()?;
            for contact in &detached {
                contacts.insert(contact.id, contact.clone());
            }
        }

        debug!(tag_id = id, detached = detached.len(), "tag deleted");
        Ok(())
    }

    /// Returns `false` when the contact already carried the tag.
    pub async fn add_tag_to_contact(&self, contact_id: ContactId, tag_id: TagId) -> Result<bool> {
        let _mutation = self.mutations.lock().await;
        if !self.tags_read()?.contains_key(&tag_id) {
            return Err(tag_not_found(tag_id));
        }

        let mut contact = self.get_contact(contact_id)?;
        if !contact.tag_ids.insert(tag_id) {
            return Ok(false);
        }
        contact.updated_at = now();
        self.publish_contact(contact).await?;
        Ok(true)
    }

    /// Returns `false` when the contact did not carry the tag.
    pub async fn remove_tag_from_contact(
        &self,
        contact_id: ContactId,
        tag_id: TagId,
    ) -> Result<bool> {
        let _mutation = self.mutations.lock().await;
        let mut contact = self.get_contact(contact_id)?;
        if !contact.tag_ids.remove(&tag_id) {
            return Ok(false);
        }
        contact.updated_at = now();
        self.publish_contact(contact).await?;
        Ok(true)
    }

    pub fn tags_for_contact(&self, contact_id: ContactId) -> Result<Vec<Tag>> {
        let tag_ids = self.get_contact(contact_id)?.tag_ids;
        let tags = self.tags_read()?;
        let mut assigned: Vec<Tag> = tag_ids
            .iter()
            .filter_map(|id| tags.get(id).cloned())
            .collect();
        assigned.sort_by(|left, right| left.name.to_lowercase().cmp(&right.name.to_lowercase()));
        Ok(assigned)
    }

    pub fn contacts_by_tag(&self, tag_id: TagId) -> Result<Vec<Contact>> {
        self.contacts_by_tags(&[tag_id])
    }

    /// Contacts carrying any of the given tags, each listed once, ordered by
    /// display name. Every tag must exist.
    pub fn contacts_by_tags(&self, tag_ids: &[TagId]) -> Result<Vec<Contact>> {
        {
            let tags = self.tags_read()?;
            if let Some(missing) = tag_ids.iter().find(|id| !tags.contains_key(*id)) {
                return Err(tag_not_found(*missing));
            }
        }

        let mut contacts: Vec<Contact> = self
            .contacts_read()?
            .values()
            .filter(|contact| tag_ids.iter().any(|id| contact.tag_ids.contains(id)))
            .cloned()
            .collect();
        sort_contacts(&mut contacts);
        Ok(contacts)
    }

    pub fn contact_count(&self, tag_id: TagId) -> Result<usize> {
        Ok(self
            .contacts_read()?
            .values()
            .filter(|contact| contact.tag_ids.contains(&tag_id))
            .count())
    }

    // Callers hold `mutations`.
    async fn insert_contact(&self, new: NewContact) -> Result<Contact> {
        if self.get_contact_by_telegram_id(new.telegram_id)?.is_some() {
            return Err(TgcmError::Conflict(format!(
                "contact with telegram id {} already exists",
                new.telegram_id
            )));
        }

        let timestamp = now();
        let contact = Contact {
            id: self.next_contact_id.fetch_add(1, Ordering::SeqCst),
            telegram_id: new.telegram_id,
            display_name: new.resolved_display_name(),
            username: new.username,
            first_name: new.first_name,
            last_name: new.last_name,
            phone: new.phone,
            bio: new.bio,
            tag_ids: BTreeSet::new(),
            created_at: timestamp,
            updated_at: timestamp,
        };
        let contact = self.publish_contact(contact).await?;
        debug!(contact_id = contact.id, "contact created");
        Ok(contact)
    }

    async fn apply_contact_update(
        &self,
        mut contact: Contact,
        update: ContactUpdate,
    ) -> Result<Contact> {
        update.apply(&mut contact);
        contact.updated_at = now();
        self.publish_contact(contact).await
    }

    async fn publish_contact(&self, contact: Contact) -> Result<Contact> {
        self.store.save_contact(&contact).await?;
        self.contacts_write()?.insert(contact.id, contact.clone());
        Ok(contact)
    }

    async fn restore_contacts(&self, contacts: &[Contact]) {
        for contact in contacts {
            if let Err(err) = self.store.save_contact(contact).await {
                warn!(contact_id = contact.id, error = %err, "failed to restore contact record");
            }
        }
    }

    fn contacts_read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ContactId, Contact>>> {
        self.contacts
            .read()
            .map_err(|_| TgcmError::Internal("contacts lock poisoned".to_string()))
    }

    fn contacts_write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ContactId, Contact>>> {
        self.contacts
            .write()
            .map_err(|_| TgcmError::Internal("contacts lock poisoned".to_string()))
    }

    fn tags_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<TagId, Tag>>> {
        self.tags
            .read()
            .map_err(|_| TgcmError::Internal("tags lock poisoned".to_string()))
    }

    fn tags_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<TagId, Tag>>> {
        self.tags
            .write()
            .map_err(|_| TgcmError::Internal("tags lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecipientResolver for ContactSys {
    async fn resolve_recipients(&self, tag_ids: &[TagId]) -> Result<Vec<Recipient>> {
        Ok(self
            .contacts_by_tags(tag_ids)?
            .iter()
            .map(Contact::recipient)
            .collect())
    }
}

fn ensure_unique_name(tags: &HashMap<TagId, Tag>, name: &str, except: Option<TagId>) -> Result<()> {
    let folded = name.to_lowercase();
    let taken = tags
        .values()
        .any(|tag| Some(tag.id) != except && tag.name.to_lowercase() == folded);
    if taken {
        return Err(TgcmError::Conflict(format!(
            "tag with name '{name}' already exists"
        )));
    }
    Ok(())
}

fn sort_contacts(contacts: &mut [Contact]) {
    contacts.sort_by(|left, right| {
        left.display_name
            .cmp(&right.display_name)
            .then(left.id.cmp(&right.id))
    });
}

fn paginate<T>(values: Vec<T>, limit: Option<usize>, offset: usize) -> Vec<T> {
    let values = values.into_iter().skip(offset);
    match limit {
        Some(limit) => values.take(limit).collect(),
        None => values.collect(),
    }
}

fn contact_not_found(id: ContactId) -> TgcmError {
    TgcmError::NotFound(format!("contact not found: {id}"))
}

fn tag_not_found(id: TagId) -> TgcmError {
    TgcmError::NotFound(format!("tag not found: {id}"))
}
