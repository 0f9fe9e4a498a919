//! Scene files: the materials, bodies, colliders and triggers a world starts with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    body::BodySource,
    collider::CollisionParameter,
    error::{ConfigError, Result},
    shape::{Kinematics, Shape},
    trigger::TriggerCallbacks,
    world::World,
    world_config::WorldConfig,
    Material,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneBody {
    pub source: BodySource,
    pub kinematics: Kinematics,

    /// Name of an entry in [`SceneConfig::materials`].
    pub material: String,

    #[serde(default)]
    pub tag: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneCollider {
    pub shape: Shape,
    pub kinematics: Kinematics,
    pub parameter: CollisionParameter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneTrigger {
    pub shape: Shape,
    pub kinematics: Kinematics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub materials: BTreeMap<String, Material>,
    #[serde(default)]
    pub bodies: Vec<SceneBody>,
    #[serde(default)]
    pub colliders: Vec<SceneCollider>,
    #[serde(default)]
    pub triggers: Vec<SceneTrigger>,
}

impl SceneConfig {
    /// Creates a world from `config` and populates it. Triggers get no callbacks; their
    /// transitions are available through [`World::last_trigger_events`].
    pub fn build(&self, config: WorldConfig) -> Result<World> {
        let mut world = World::new(config)?;

        let mut material_ids = BTreeMap::new();
        for (name, material) in &self.materials {
            let id = world
                .add_material(*material)
                .map_err(|err| ConfigError::InvalidMaterial(format!("`{}`: {}", name, err)))?;
            material_ids.insert(name.as_str(), id);
        }

        for collider in &self.colliders {
            world.add_collider(collider.shape.clone(), collider.kinematics, collider.parameter)?;
        }

        for trigger in &self.triggers {
            world.add_trigger(trigger.shape.clone(), trigger.kinematics, TriggerCallbacks::new())?;
        }

        for body in &self.bodies {
            let material = *material_ids
                .get(body.material.as_str())
                .ok_or_else(|| ConfigError::InvalidMaterial(format!("unknown material `{}`", body.material)))?;
            world.add_body(&body.source, body.kinematics, material, body.tag)?;
        }

        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{boundary_policy::BoundaryPolicy, error::SimulationError};

    const SCENE: &str = r#"
materials:
  jelly:
    type: elastic
    density: 1000
    youngs_modulus: 10000
    poissons_ratio: 0.3
bodies:
  - source:
      shape:
        type: circle
        radius: 0.05
    kinematics:
      center: [0.5, 0.5]
      mobility: dynamic
    material: jelly
    tag: 3
colliders:
  - shape:
      type: box
      half_extent: [0.5, 0.05]
    kinematics:
      center: [0.5, 0.05]
      mobility: static
    parameter:
      collision_type: slip
      friction_coeff: 0.3
triggers:
  - shape:
      type: circle
      radius: 0.1
    kinematics:
      center: [0.5, 0.5]
      mobility: static
"#;

    #[test]
    fn scene_builds_a_world() {
        let scene: SceneConfig = serde_yaml::from_str(SCENE).unwrap();
        let world = scene.build(WorldConfig::new(BoundaryPolicy::Clamp)).unwrap();
        assert!(world.num_particles() > 0);
        assert!(world.particles().tag.iter().all(|&t| t == 3));
        assert_eq!(world.bodies().count(), 1);
    }

    #[test]
    fn unknown_material_names_are_rejected() {
        let mut scene: SceneConfig = serde_yaml::from_str(SCENE).unwrap();
        scene.bodies[0].material = "steel".to_string();
        assert!(matches!(
            scene.build(WorldConfig::new(BoundaryPolicy::Clamp)),
            Err(SimulationError::Config(ConfigError::InvalidMaterial(_)))
        ));
    }
}
