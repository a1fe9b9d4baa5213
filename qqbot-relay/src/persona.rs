//! Persona catalog.
//!
//! Ordered set of system prompts users can switch between with `/person`.
//! Reads are shared; every mutation is applied to a copy, persisted, and
//! only then committed, so a failed write leaves the catalog untouched.

use crate::store::Store;
use qqbot_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A selectable system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    /// Display position and `/person` index; not required to be unique
    pub order: i64,
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub is_default: bool,
}

impl Persona {
    /// Catalog entry seeded when nothing is stored.
    pub fn seed() -> Self {
        Self {
            id: "default".into(),
            order: 1,
            name: "默认助手".into(),
            prompt: "你是一个友好的AI助手。".into(),
            is_default: true,
        }
    }
}

/// Fields accepted when creating a persona.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPersona {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub order: Option<i64>,
}

/// Partial persona update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaUpdate {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub order: Option<i64>,
}

pub struct PersonaCatalog {
    personas: RwLock<Vec<Persona>>,
    store: Arc<dyn Store>,
}

impl PersonaCatalog {
    /// Load the catalog from `store`, seeding the default persona when empty.
    pub async fn load(store: Arc<dyn Store>) -> Result<Self> {
        let mut personas = store.load_personas().await?;
        if personas.is_empty() {
            personas.push(Persona::seed());
            store.save_personas(&personas).await?;
            tracing::info!("Seeded default persona");
        }
        Ok(Self {
            personas: RwLock::new(personas),
            store,
        })
    }

    /// All personas in stored order.
    pub async fn list(&self) -> Vec<Persona> {
        self.personas.read().await.clone()
    }

    /// All personas sorted by `order`; ties keep stored order.
    pub async fn list_sorted(&self) -> Vec<Persona> {
        let mut personas = self.list().await;
        personas.sort_by_key(|p| p.order);
        personas
    }

    pub async fn find_by_id(&self, id: &str) -> Option<Persona> {
        self.personas.read().await.iter().find(|p| p.id == id).cloned()
    }

    /// The flagged default, else the first persona.
    pub async fn find_default(&self) -> Option<Persona> {
        let personas = self.personas.read().await;
        personas
            .iter()
            .find(|p| p.is_default)
            .or_else(|| personas.first())
            .cloned()
    }

    /// First persona whose `order` matches.
    pub async fn find_by_order(&self, order: i64) -> Option<Persona> {
        self.personas
            .read()
            .await
            .iter()
            .find(|p| p.order == order)
            .cloned()
    }

    /// First persona in stored order.
    pub async fn first(&self) -> Option<Persona> {
        self.personas.read().await.first().cloned()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn create(&self, new: NewPersona) -> Result<Persona> {
        if new.name.trim().is_empty() {
            return Err(Error::InvalidInput("persona name is required".into()));
        }
        let mut personas = self.personas.write().await;
        let persona = Persona {
            id: chrono::Utc::now().timestamp_millis().to_string(),
            order: new.order.unwrap_or(personas.len() as i64 + 1),
            name: new.name,
            prompt: new.prompt,
            is_default: false,
        };
        let mut next = personas.clone();
        next.push(persona.clone());
        self.commit(&mut personas, next).await?;
        Ok(persona)
    }

    pub async fn update(&self, id: &str, update: PersonaUpdate) -> Result<Persona> {
        let mut personas = self.personas.write().await;
        let mut next = personas.clone();
        let persona = next
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::NotFound(format!("persona {id}")))?;
        if let Some(name) = update.name {
            persona.name = name;
        }
        if let Some(prompt) = update.prompt {
            persona.prompt = prompt;
        }
        if let Some(order) = update.order {
            persona.order = order;
        }
        let updated = persona.clone();
        self.commit(&mut personas, next).await?;
        Ok(updated)
    }

    /// Remove a persona. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut personas = self.personas.write().await;
        let next: Vec<Persona> = personas.iter().filter(|p| p.id != id).cloned().collect();
        if next.len() == personas.len() {
            return Ok(false);
        }
        self.commit(&mut personas, next).await?;
        Ok(true)
    }

    /// Flag `id` as the only default.
    pub async fn set_default(&self, id: &str) -> Result<()> {
        let mut personas = self.personas.write().await;
        if !personas.iter().any(|p| p.id == id) {
            return Err(Error::NotFound(format!("persona {id}")));
        }
        let next = personas
            .iter()
            .map(|p| Persona {
                is_default: p.id == id,
                ..p.clone()
            })
            .collect();
        self.commit(&mut personas, next).await
    }

    /// Exchange the `order` of two personas. Unknown ids leave the catalog
    /// unchanged; returns whether a swap happened.
    pub async fn swap_order(&self, id1: &str, id2: &str) -> Result<bool> {
        let mut personas = self.personas.write().await;
        let (Some(i), Some(j)) = (
            personas.iter().position(|p| p.id == id1),
            personas.iter().position(|p| p.id == id2),
        ) else {
            return Ok(false);
        };
        let mut next = personas.clone();
        let order_i = next[i].order;
        next[i].order = next[j].order;
        next[j].order = order_i;
        self.commit(&mut personas, next).await?;
        Ok(true)
    }

    async fn commit(&self, current: &mut Vec<Persona>, next: Vec<Persona>) -> Result<()> {
        self.store.save_personas(&next).await?;
        *current = next;
        Ok(())
    }
}
