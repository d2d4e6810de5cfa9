pub mod spectrum;
pub mod transform;
pub mod window;

pub trait Reconfigurable<Cfg> {
    fn update_config(&mut self, config: Cfg);
}
