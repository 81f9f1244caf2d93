use super::limits::{INFLUENCE_WEIGHT_TOTAL, MAX_INFLUENCES};
use crate::skin::lod_model::StaticLodModel;
use crate::skin::vertex::BoneInfluence;

/// Rescale each influence so its weights sum to 255, assigning the rounding
/// remainder to slot 0. Influences with no weight become rigid on slot 0.
///
/// Returns the number of influences changed.
pub fn fix_influence_weights(influences: &mut [BoneInfluence]) -> u32 {
    let mut fixed_count = 0u32;

    for influence in influences.iter_mut() {
        let total = influence.total_weight();
        if total == INFLUENCE_WEIGHT_TOTAL {
            continue;
        }
        fixed_count += 1;

        if total == 0 {
            *influence = BoneInfluence::rigid(influence.bones[0]);
            continue;
        }

        let mut assigned = 0u32;
        for slot in 0..MAX_INFLUENCES {
            let scaled = influence.weights[slot] as u32 * INFLUENCE_WEIGHT_TOTAL / total;
            influence.weights[slot] = scaled as u8;
            assigned += scaled;
        }
        influence.weights[0] += (INFLUENCE_WEIGHT_TOTAL - assigned) as u8;
    }

    fixed_count
}

/// Apply `fix_influence_weights` to every soft vertex and influence set of a
/// LOD. The GPU vertex buffer must be rebuilt afterwards.
pub fn fix_lod_influence_weights(lod: &mut StaticLodModel) -> u32 {
    let mut fixed_count = 0u32;

    for chunk in &mut lod.chunks {
        let mut influences: Vec<BoneInfluence> = chunk.soft_vertices.iter().map(|v| v.influence).collect();
        fixed_count += fix_influence_weights(&mut influences);
        for (vertex, influence) in chunk.soft_vertices.iter_mut().zip(influences) {
            vertex.influence = influence;
        }
    }

    for set in &mut lod.vertex_influences {
        fixed_count += fix_influence_weights(&mut set.influences);
    }

    fixed_count
}
