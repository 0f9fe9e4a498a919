use crate::{body::BodyHandle, floating_type_mod::FT, material::MaterialId, M2, V2};
use nalgebra::zero;

/// Per-particle plastic bookkeeping.
///
/// `jp` is the plastic volume ratio (snow), `hardening`/`log_vol_gain` drive the
/// Drucker–Prager yield surface (sand). Elastic and fluid particles keep the defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlasticState {
    pub jp: FT,
    pub hardening: FT,
    pub log_vol_gain: FT,
}

impl Default for PlasticState {
    fn default() -> Self {
        PlasticState {
            jp: 1.,
            hardening: 0.,
            log_vol_gain: 0.,
        }
    }
}

/// Deformation state updated by the material model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deformation {
    /// Deformation gradient `F`.
    pub f: M2,

    /// Kirchhoff stress derived from `f`.
    pub stress: M2,

    pub plastic: PlasticState,
}

impl Default for Deformation {
    fn default() -> Self {
        Deformation {
            f: M2::identity(),
            stress: M2::zeros(),
            plastic: PlasticState::default(),
        }
    }
}

macro_rules! decl_particle_vec {
    (pub struct $struct_name:ident { $(pub $field_name:ident: Vec<$field_type:ty> | $default_value:expr),*$(,)?  }) => {
        #[derive(Clone, Default)]
        pub struct $struct_name {
            $(
                pub $field_name : Vec<$field_type>,
            )*
        }

        impl $struct_name {
            pub fn swap(&mut self, i: usize, j: usize) {
                $(
                    self.$field_name.swap(i, j);
                )*
            }

            pub fn truncate(&mut self, len: usize) {
                $(
                    self.$field_name.truncate(len);
                )*
            }

            pub fn extend(&mut self, num_elements: usize) {
                $(
                    self.$field_name.extend((0..num_elements).map::<$field_type, _>(|_| $default_value));
                )*
            }

            pub fn with_len(len: usize) -> Self {
                Self {
                    $(
                        $field_name: (0..len).map(|_| $default_value).collect::<Vec<$field_type>>(),
                    )*
                }
            }

            /// Copies `other` into `self`, reusing the existing allocations.
            pub fn copy_from(&mut self, other: &Self) {
                $(
                    self.$field_name.clone_from(&other.$field_name);
                )*
            }
        }
    }
}

decl_particle_vec! {
    pub struct ParticleVec {
        // persistent and unique over the lifetime of the world
        pub id: Vec<u32> | 0,

        // relative to the World Offset
        pub position: Vec<V2> | zero(),
        pub velocity: Vec<V2> | zero(),

        // APIC affine velocity (also the gathered velocity gradient)
        pub affine: Vec<M2> | zero(),
        pub deformation: Vec<Deformation> | Deformation::default(),

        pub mass: Vec<FT> | 0.,
        pub volume0: Vec<FT> | 0.,

        pub material: Vec<MaterialId> | MaterialId(0),
        pub body: Vec<BodyHandle> | BodyHandle(0),
        pub tag: Vec<u32> | 0,

        // static and kinematic particles only scatter into the rigid channel of the grid
        pub dynamic: Vec<bool> | true,

        // mesh vertices get their elastic force from triangle elements instead of their own stress
        pub mesh_vertex: Vec<bool> | false,
        pub element_force: Vec<V2> | zero(),

        pub removed: Vec<bool> | false,
    }
}

impl ParticleVec {
    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    pub fn total_mass(&self) -> FT {
        self.mass.iter().sum()
    }

    pub fn total_momentum(&self) -> V2 {
        self.mass
            .iter()
            .zip(self.velocity.iter())
            .fold(V2::zeros(), |acc, (&m, &v)| acc + v * m)
    }

    /// Drops all particles flagged as removed. Survivors keep their relative order.
    ///
    /// Returns the number of removed particles.
    pub fn compact(&mut self) -> usize {
        let len = self.len();
        let mut write = 0;
        for read in 0..len {
            if !self.removed[read] {
                if read != write {
                    self.swap(read, write);
                }
                write += 1;
            }
        }
        self.truncate(write);
        len - write
    }

    /// Flags every particle of `body` as removed.
    pub fn mark_body_removed(&mut self, body: BodyHandle) {
        for (b, removed) in self.body.iter().zip(self.removed.iter_mut()) {
            if *b == body {
                *removed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec2f;

    #[test]
    fn compact_keeps_survivor_order() {
        let mut particles = ParticleVec::with_len(5);
        for i in 0..5 {
            particles.id[i] = i as u32 * 10;
            particles.position[i] = vec2f(i as FT, 0.);
        }
        particles.removed[1] = true;
        particles.removed[3] = true;

        assert_eq!(particles.compact(), 2);
        assert_eq!(particles.id, vec![0, 20, 40]);
        assert_eq!(particles.position[2], vec2f(4., 0.));
        assert!(particles.removed.iter().all(|r| !r));
    }

    #[test]
    fn extend_uses_defaults() {
        let mut particles = ParticleVec::with_len(1);
        particles.extend(2);
        assert_eq!(particles.len(), 3);
        assert_eq!(particles.deformation[2].f, M2::identity());
        assert_eq!(particles.deformation[2].plastic.jp, 1.);
        assert!(particles.dynamic[2]);
    }
}
