use log::warn;
use voxmap_core::integrator::projective::ProjectiveIntegrator;
use voxmap_core::integrator::range_image::PosedImage;
use voxmap_core::map::variant::Map;
use voxmap_core::pointcloud::PosedPointcloud;

/// Owns the occupancy map and a set of named measurement integrators.
/// Inputs dispatch their measurements to the stages they were configured
/// with.
pub struct Pipeline {
    occupancy_map: Map,
    integrators: Vec<(String, ProjectiveIntegrator)>,
}

impl Pipeline {
    pub fn new(occupancy_map: Map) -> Self {
        Pipeline {
            occupancy_map,
            integrators: Vec::new(),
        }
    }

    pub fn add_integrator(&mut self, name: impl Into<String>, integrator: ProjectiveIntegrator) {
        self.integrators.push((name.into(), integrator));
    }

    pub fn map(&self) -> &Map {
        &self.occupancy_map
    }

    pub fn map_mut(&mut self) -> &mut Map {
        &mut self.occupancy_map
    }

    /// Runs the named integrator stages on a posed pointcloud.
    pub fn run(&mut self, integrator_names: &[String], pointcloud: &PosedPointcloud) {
        let Pipeline {
            occupancy_map,
            integrators,
        } = self;
        for name in integrator_names {
            match integrators
                .iter_mut()
                .find(|(integrator_name, _)| integrator_name == name)
            {
                Some((_, integrator)) => {
                    integrator.integrate_pointcloud(pointcloud, occupancy_map);
                }
                None => warn!("Unknown measurement integrator \"{name}\"."),
            }
        }
    }

    /// Runs the named integrator stages on a posed range image.
    pub fn run_range_image(&mut self, integrator_names: &[String], range_image: &PosedImage) {
        let Pipeline {
            occupancy_map,
            integrators,
        } = self;
        for name in integrator_names {
            match integrators
                .iter_mut()
                .find(|(integrator_name, _)| integrator_name == name)
            {
                Some((_, integrator)) => {
                    integrator.integrate_range_image(range_image, occupancy_map);
                }
                None => warn!("Unknown measurement integrator \"{name}\"."),
            }
        }
    }
}
