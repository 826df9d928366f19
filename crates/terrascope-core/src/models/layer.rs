use serde::{Deserialize, Serialize};

/// Rendering family a map layer belongs to. The viewer groups its layer
/// panel by kind, so categorization has to be stable and total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "raster")]
    Raster,
    #[serde(rename = "street")]
    StreetImagery,
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerKind::Vector => write!(f, "Vector"),
            LayerKind::Raster => write!(f, "Raster"),
            LayerKind::StreetImagery => write!(f, "Street imagery"),
        }
    }
}

/// Map layer attached to a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub name: String,
    pub kind: LayerKind,
    #[serde(rename = "sourceUrl")]
    pub source_url: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    pub opacity: Option<f32>,
    pub attribution: Option<String>,
}

fn default_visible() -> bool {
    true
}

/// Project layers grouped by kind, in the order the viewer panel lists them
#[derive(Debug, Clone, Default)]
pub struct LayerGroups {
    pub vector: Vec<Layer>,
    pub raster: Vec<Layer>,
    pub street: Vec<Layer>,
}

impl LayerGroups {
    pub fn categorize(layers: Vec<Layer>) -> Self {
        let mut groups = Self::default();
        for layer in layers {
            match layer.kind {
                LayerKind::Vector => groups.vector.push(layer),
                LayerKind::Raster => groups.raster.push(layer),
                LayerKind::StreetImagery => groups.street.push(layer),
            }
        }
        groups
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.vector.iter().chain(self.raster.iter()).chain(self.street.iter())
    }

    pub fn total(&self) -> usize {
        self.vector.len() + self.raster.len() + self.street.len()
    }

    pub fn visible_count(&self) -> usize {
        self.iter().filter(|l| l.visible).count()
    }

    /// Toggle visibility for every layer of one kind, returning how many
    /// layers changed state.
    pub fn set_kind_visibility(&mut self, kind: LayerKind, visible: bool) -> usize {
        let group = match kind {
            LayerKind::Vector => &mut self.vector,
            LayerKind::Raster => &mut self.raster,
            LayerKind::StreetImagery => &mut self.street,
        };
        let mut changed = 0;
        for layer in group.iter_mut() {
            if layer.visible != visible {
                layer.visible = visible;
                changed += 1;
            }
        }
        changed
    }
}
