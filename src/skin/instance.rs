//! Per-instance alternate weight state.
//!
//! A mesh instance never touches the shared mesh. Requests made through
//! `toggle_instance_vertex_weights` and the bone pair list only take effect
//! once `update_instance_vertex_weights` runs for the LOD.

use serde::Serialize;

use super::chunk::{SkelMeshChunk, SkelMeshSection};
use super::index::MultiSizeIndexContainer;
use super::influences::{BoneIndexPair, BonePair, InfluenceUsage, VertexInfluenceSet};
use super::lod_model::StaticLodModel;
use super::mesh::SkeletalMesh;
use super::vertex::BoneInfluence;
use crate::error::{Result, SkinError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceLodInfo {
    /// Requested state changed since the last weight update.
    pub needs_instance_weight_update: bool,
    /// Requested state.
    pub always_use_instance_weights: bool,
    pub instance_weight_usage: InfluenceUsage,
    pub instance_weight_idx: usize,
    /// State the render path uses.
    pub instance_weights_active: bool,
}

/// Render data a draw of one LOD reads.
pub type RenderData<'m> = (&'m [SkelMeshSection], &'m [SkelMeshChunk], &'m MultiSizeIndexContainer);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkinnedMeshInstance {
    lod_info: Vec<InstanceLodInfo>,
    instance_vertex_weight_bones: Vec<BonePair>,
    /// Partial swap influences per LOD, rebuilt by each weight update.
    instance_influences: Vec<Vec<BoneInfluence>>,
    required_bones_up_to_date: bool,
}

impl SkinnedMeshInstance {
    pub fn new(mesh: &SkeletalMesh) -> Self {
        let lod_info = mesh
            .lod_models
            .iter()
            .map(|lod| {
                let mut info = InstanceLodInfo::default();
                if let Some(set) = lod.vertex_influences.first() {
                    info.instance_weight_idx = 0;
                    info.instance_weight_usage = set.usage;
                }
                info
            })
            .collect();

        Self {
            lod_info,
            instance_vertex_weight_bones: vec![],
            instance_influences: vec![vec![]; mesh.lod_models.len()],
            required_bones_up_to_date: true,
        }
    }

    pub fn lod_info(&self, lod: usize) -> Option<&InstanceLodInfo> {
        self.lod_info.get(lod)
    }

    pub fn instance_vertex_weight_bones(&self) -> &[BonePair] {
        &self.instance_vertex_weight_bones
    }

    pub fn required_bones_up_to_date(&self) -> bool {
        self.required_bones_up_to_date
    }

    fn lod_info_mut(&mut self, lod: usize) -> Result<&mut InstanceLodInfo> {
        let count = self.lod_info.len();
        self.lod_info.get_mut(lod).ok_or(SkinError::LodOutOfRange { lod, count })
    }

    /// Requests alternate weights on or off for a LOD.
    pub fn toggle_instance_vertex_weights(&mut self, enabled: bool, lod: usize) {
        let count = self.lod_info.len();
        let Some(info) = self.lod_info.get_mut(lod) else {
            log::warn!("toggle_instance_vertex_weights: LOD {} out of range ({} LODs)", lod, count);
            return;
        };
        if info.always_use_instance_weights == enabled {
            return;
        }

        info.needs_instance_weight_update = true;
        if info.instance_weight_usage == InfluenceUsage::FullSwap {
            self.required_bones_up_to_date = false;
        }
        info.always_use_instance_weights = enabled;
        if !enabled {
            self.instance_vertex_weight_bones.clear();
        }
    }

    /// Selects which of the LOD's influence sets the instance uses.
    pub fn set_instance_weight_index(&mut self, mesh: &SkeletalMesh, lod: usize, index: usize) -> Result<()> {
        let model = mesh.lod_model(lod)?;
        let set = model
            .vertex_influences
            .get(index)
            .ok_or(SkinError::InfluenceSetOutOfRange {
                index,
                count: model.vertex_influences.len(),
            })?;
        let usage = set.usage;
        let info = self.lod_info_mut(lod)?;
        info.instance_weight_idx = index;
        info.instance_weight_usage = usage;
        info.needs_instance_weight_update = true;
        Ok(())
    }

    fn mark_partial_swap_lods(&mut self) {
        for info in self
            .lod_info
            .iter_mut()
            .filter(|i| i.instance_weight_usage == InfluenceUsage::PartialSwap)
        {
            info.needs_instance_weight_update = true;
        }
    }

    /// Adds the pair (bone, parent of bone), or (bone, bone) when not pairing
    /// with the parent or the bone is the root.
    pub fn add_instance_vertex_weight_bone_parented(
        &mut self,
        mesh: &SkeletalMesh,
        bone_name: &str,
        pair_with_parent: bool,
    ) -> Result<()> {
        let bone_index = mesh
            .find_bone_index(bone_name)
            .ok_or_else(|| SkinError::UnknownBone(bone_name.to_string()))?;
        let partner = match mesh.ref_skeleton[bone_index].parent() {
            Some(parent) if pair_with_parent => mesh
                .ref_skeleton
                .get(parent)
                .map_or(bone_name, |p| p.name.as_str()),
            _ => bone_name,
        };

        let pair = BonePair::new(bone_name, partner);
        if self.find_instance_vertex_weight_bone_pair_index(&pair).is_none() {
            self.instance_vertex_weight_bones.push(pair);
            self.mark_partial_swap_lods();
        }
        Ok(())
    }

    /// Drops every pair led by `bone_name`.
    pub fn remove_instance_vertex_weight_bone_parented(&mut self, bone_name: &str) {
        let before = self.instance_vertex_weight_bones.len();
        self.instance_vertex_weight_bones.retain(|p| p.names[0] != bone_name);
        if self.instance_vertex_weight_bones.len() != before {
            self.mark_partial_swap_lods();
        }
    }

    pub fn update_instance_vertex_weight_bones(&mut self, pairs: Vec<BonePair>) {
        self.instance_vertex_weight_bones = pairs;
        self.mark_partial_swap_lods();
    }

    pub fn find_instance_vertex_weight_bone_pair_index(&self, pair: &BonePair) -> Option<usize> {
        self.instance_vertex_weight_bones.iter().position(|p| p.is_match(pair))
    }

    fn active_set<'m>(&self, model: &'m StaticLodModel, lod: usize) -> Option<&'m VertexInfluenceSet> {
        let info = self.lod_info.get(lod)?;
        if !info.instance_weights_active {
            return None;
        }
        model.vertex_influences.get(info.instance_weight_idx)
    }

    /// Applies the requested state for a LOD. For a partial swap the instance
    /// influences start from the mesh weights and every vertex mapped to an
    /// active bone pair takes the alternate weight.
    pub fn update_instance_vertex_weights(&mut self, mesh: &SkeletalMesh, lod: usize) -> Result<()> {
        let model = mesh.lod_model(lod)?;
        let info = self.lod_info_mut(lod)?.clone();

        let mut influences = vec![];
        let active = if info.always_use_instance_weights {
            let set = model
                .vertex_influences
                .get(info.instance_weight_idx)
                .ok_or(SkinError::InfluenceSetOutOfRange {
                    index: info.instance_weight_idx,
                    count: model.vertex_influences.len(),
                })?;

            if set.usage == InfluenceUsage::PartialSwap {
                influences = (0..model.vertex_buffer.num_vertices())
                    .map(|v| model.vertex_buffer.vertex_influence(v))
                    .collect::<Result<Vec<_>>>()?;
                for pair in &self.instance_vertex_weight_bones {
                    let (Some(a), Some(b)) = (mesh.find_bone_index(&pair.names[0]), mesh.find_bone_index(&pair.names[1]))
                    else {
                        log::warn!("bone pair {:?} not in skeleton, skipping", pair.names);
                        continue;
                    };
                    let Some(mapped) = set.mapped_vertices(BoneIndexPair::new(a as i32, b as i32)) else {
                        continue;
                    };
                    for &vertex in mapped {
                        let v = vertex as usize;
                        match (influences.get_mut(v), set.influences.get(v)) {
                            (Some(slot), Some(&alt)) => *slot = alt,
                            _ => log::warn!("mapped vertex {} outside LOD {}", v, lod),
                        }
                    }
                }
            }
            true
        } else {
            false
        };

        self.instance_influences[lod] = influences;
        if info.instance_weight_usage == InfluenceUsage::FullSwap {
            self.required_bones_up_to_date = true;
        }
        let info = self.lod_info_mut(lod)?;
        info.instance_weights_active = active;
        info.needs_instance_weight_update = false;
        Ok(())
    }

    /// Weights the render path applies to a vertex.
    pub fn effective_influence(&self, mesh: &SkeletalMesh, lod: usize, vertex: usize) -> Result<BoneInfluence> {
        let model = mesh.lod_model(lod)?;
        let count = model.vertex_buffer.num_vertices();
        if vertex >= count {
            return Err(SkinError::VertexOutOfRange { index: vertex, count });
        }

        match self.active_set(model, lod) {
            Some(set) if set.usage == InfluenceUsage::FullSwap => {
                set.influences
                    .get(vertex)
                    .copied()
                    .ok_or(SkinError::VertexOutOfRange {
                        index: vertex,
                        count: set.influences.len(),
                    })
            }
            Some(_) => match self.instance_influences[lod].get(vertex) {
                Some(&influence) => Ok(influence),
                None => model.vertex_buffer.vertex_influence(vertex),
            },
            None => model.vertex_buffer.vertex_influence(vertex),
        }
    }

    /// Sections, chunks and index container a draw of the LOD uses.
    pub fn render_data<'m>(&self, mesh: &'m SkeletalMesh, lod: usize) -> Result<RenderData<'m>> {
        let model = mesh.lod_model(lod)?;
        match self.active_set(model, lod) {
            Some(set) if set.usage == InfluenceUsage::FullSwap => {
                Ok((&set.sections, &set.chunks, &model.multi_size_index_container))
            }
            _ => Ok((&model.sections, &model.chunks, &model.multi_size_index_container)),
        }
    }

    pub fn required_bones<'m>(&self, mesh: &'m SkeletalMesh, lod: usize) -> Result<&'m [u8]> {
        let model = mesh.lod_model(lod)?;
        match self.active_set(model, lod) {
            Some(set) if set.usage == InfluenceUsage::FullSwap => Ok(&set.required_bones),
            _ => Ok(&model.required_bones),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skin::mesh::MeshBone;

    fn mesh_with_sets(usages: &[InfluenceUsage]) -> SkeletalMesh {
        let mut lod = StaticLodModel::default();
        for &usage in usages {
            lod.vertex_influences.push(VertexInfluenceSet {
                usage,
                required_bones: vec![0, 9],
                ..Default::default()
            });
        }
        lod.required_bones = vec![0, 1];
        SkeletalMesh {
            ref_skeleton: vec![
                MeshBone::new("root", None),
                MeshBone::new("upper", Some(0)),
                MeshBone::new("lower", Some(1)),
            ],
            lod_models: vec![lod],
            has_vertex_colors: false,
        }
    }

    #[test]
    fn new_picks_first_set_usage() {
        let mesh = mesh_with_sets(&[InfluenceUsage::FullSwap, InfluenceUsage::PartialSwap]);
        let instance = SkinnedMeshInstance::new(&mesh);
        let info = instance.lod_info(0).unwrap();
        assert_eq!(info.instance_weight_idx, 0);
        assert_eq!(info.instance_weight_usage, InfluenceUsage::FullSwap);
        assert!(!info.instance_weights_active);
    }

    #[test]
    fn toggle_only_marks_until_update() {
        let mesh = mesh_with_sets(&[InfluenceUsage::FullSwap]);
        let mut instance = SkinnedMeshInstance::new(&mesh);

        instance.toggle_instance_vertex_weights(true, 0);
        let info = instance.lod_info(0).unwrap();
        assert!(info.needs_instance_weight_update);
        assert!(!info.instance_weights_active);
        assert!(!instance.required_bones_up_to_date());
        assert_eq!(instance.required_bones(&mesh, 0).unwrap(), &[0, 1]);

        instance.update_instance_vertex_weights(&mesh, 0).unwrap();
        assert!(instance.lod_info(0).unwrap().instance_weights_active);
        assert!(instance.required_bones_up_to_date());
        assert_eq!(instance.required_bones(&mesh, 0).unwrap(), &[0, 9]);

        instance.toggle_instance_vertex_weights(false, 0);
        instance.update_instance_vertex_weights(&mesh, 0).unwrap();
        assert_eq!(instance.required_bones(&mesh, 0).unwrap(), &[0, 1]);
    }

    #[test]
    fn toggle_same_state_is_noop_and_bad_lod_ignored() {
        let mesh = mesh_with_sets(&[InfluenceUsage::PartialSwap]);
        let mut instance = SkinnedMeshInstance::new(&mesh);
        instance.toggle_instance_vertex_weights(false, 0);
        assert!(!instance.lod_info(0).unwrap().needs_instance_weight_update);
        instance.toggle_instance_vertex_weights(true, 3);
        assert_eq!(instance.lod_info(0).unwrap(), &InstanceLodInfo::default());
    }

    #[test]
    fn disabling_clears_bone_pairs() {
        let mesh = mesh_with_sets(&[InfluenceUsage::PartialSwap]);
        let mut instance = SkinnedMeshInstance::new(&mesh);
        instance.toggle_instance_vertex_weights(true, 0);
        instance
            .add_instance_vertex_weight_bone_parented(&mesh, "lower", true)
            .unwrap();
        assert_eq!(instance.instance_vertex_weight_bones(), &[BonePair::new("lower", "upper")]);

        instance.toggle_instance_vertex_weights(false, 0);
        assert!(instance.instance_vertex_weight_bones().is_empty());
    }

    #[test]
    fn bone_pair_list_edits() {
        let mesh = mesh_with_sets(&[InfluenceUsage::PartialSwap]);
        let mut instance = SkinnedMeshInstance::new(&mesh);

        instance.add_instance_vertex_weight_bone_parented(&mesh, "root", true).unwrap();
        instance.add_instance_vertex_weight_bone_parented(&mesh, "upper", true).unwrap();
        instance.add_instance_vertex_weight_bone_parented(&mesh, "upper", true).unwrap();
        assert_eq!(instance.instance_vertex_weight_bones().len(), 2);
        assert_eq!(
            instance.find_instance_vertex_weight_bone_pair_index(&BonePair::new("root", "upper")),
            Some(1)
        );
        assert!(instance.lod_info(0).unwrap().needs_instance_weight_update);

        instance.remove_instance_vertex_weight_bone_parented("upper");
        assert_eq!(instance.instance_vertex_weight_bones(), &[BonePair::new("root", "root")]);

        assert!(matches!(
            instance.add_instance_vertex_weight_bone_parented(&mesh, "tail", true),
            Err(SkinError::UnknownBone(_))
        ));
    }

    #[test]
    fn select_second_set() {
        let mesh = mesh_with_sets(&[InfluenceUsage::PartialSwap, InfluenceUsage::FullSwap]);
        let mut instance = SkinnedMeshInstance::new(&mesh);
        instance.set_instance_weight_index(&mesh, 0, 1).unwrap();
        let info = instance.lod_info(0).unwrap();
        assert_eq!(info.instance_weight_idx, 1);
        assert_eq!(info.instance_weight_usage, InfluenceUsage::FullSwap);
        assert!(info.needs_instance_weight_update);

        assert!(matches!(
            instance.set_instance_weight_index(&mesh, 0, 2),
            Err(SkinError::InfluenceSetOutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn update_without_set_fails() {
        let mesh = mesh_with_sets(&[]);
        let mut instance = SkinnedMeshInstance::new(&mesh);
        instance.toggle_instance_vertex_weights(true, 0);
        assert!(matches!(
            instance.update_instance_vertex_weights(&mesh, 0),
            Err(SkinError::InfluenceSetOutOfRange { index: 0, count: 0 })
        ));
    }
}
