use glam::Vec3;
use rustc_hash::FxHashMap;

use karst_shared::protocol::ControlFlags;
use karst_shared::wire::PacketWriter;

/// Locally controlled player: position, look direction, pressed controls,
/// and the change-tracking that decides whether a position packet is due.
pub struct LocalPlayer {
    name: String,
    position: Vec3,
    velocity: Vec3,
    pitch: f32,
    yaw: f32,
    controls: ControlFlags,
    fov: f32,
    wanted_range: u8,
    hud_params: FxHashMap<u32, FxHashMap<String, String>>,
    last_sent: Option<SentSnapshot>,
}

#[derive(PartialEq, Clone, Copy)]
struct SentSnapshot {
    position: Vec3,
    pitch: f32,
    yaw: f32,
    controls: ControlFlags,
}

impl LocalPlayer {
    pub fn new(name: String, fov: f32, wanted_range: u8) -> Self {
        Self {
            name,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            pitch: 0.0,
            yaw: 0.0,
            controls: ControlFlags::empty(),
            fov,
            wanted_range,
            hud_params: FxHashMap::default(),
            last_sent: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    pub fn set_look(&mut self, pitch: f32, yaw: f32) {
        self.pitch = pitch;
        self.yaw = yaw;
    }

    pub fn set_controls(&mut self, controls: ControlFlags) {
        self.controls = controls;
    }

    pub fn set_hud_param(&mut self, hud_id: u32, name: String, value: String) {
        self.hud_params.entry(hud_id).or_default().insert(name, value);
    }

    pub fn hud_param(&self, hud_id: u32, name: &str) -> Option<&str> {
        self.hud_params
            .get(&hud_id)
            .and_then(|params| params.get(name))
            .map(String::as_str)
    }

    /// Whether anything the server cares about moved since the last send.
    pub fn position_changed(&self) -> bool {
        match self.last_sent {
            None => true,
            Some(sent) => {
                sent.position != self.position
                    || sent.pitch != self.pitch
                    || sent.yaw != self.yaw
                    || sent.controls != self.controls
            }
        }
    }

    pub fn mark_position_sent(&mut self) {
        self.last_sent = Some(SentSnapshot {
            position: self.position,
            pitch: self.pitch,
            yaw: self.yaw,
            controls: self.controls,
        });
    }

    /// PlayerPosition field layout: position, velocity, look, controls,
    /// fov and wanted range.
    pub fn write_control(&self, w: &mut PacketWriter) {
        w.write_v3f(self.position);
        w.write_v3f(self.velocity);
        w.write_f32(self.pitch);
        w.write_f32(self.yaw);
        w.write_u32(self.controls.bits());
        w.write_f32(self.fov);
        w.write_u8(self.wanted_range);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use karst_shared::protocol::ControlFlags;
    use karst_shared::wire::{Packet, PacketWriter};

    use super::LocalPlayer;

    #[test]
    fn position_changed_tracks_position_look_and_controls() {
        let mut player = LocalPlayer::new("ada".into(), 72.0, 10);
        assert!(player.position_changed(), "never sent yet");

        player.mark_position_sent();
        assert!(!player.position_changed());

        player.set_position(Vec3::new(1.0, 0.0, 0.0));
        assert!(player.position_changed());
        player.mark_position_sent();

        player.set_controls(ControlFlags::FORWARD);
        assert!(player.position_changed());
    }

    #[test]
    fn control_snapshot_writes_the_documented_layout() {
        let mut player = LocalPlayer::new("ada".into(), 72.0, 10);
        player.set_position(Vec3::new(1.0, 2.0, 3.0));
        player.set_velocity(Vec3::new(0.0, -1.0, 0.0));
        player.set_look(0.5, -1.5);
        player.set_controls(ControlFlags::FORWARD | ControlFlags::JUMP);

        let mut w = PacketWriter::new(0);
        player.write_control(&mut w);
        let pkt = Packet::from_bytes(w.finish().to_bytes()).unwrap();
        let mut r = pkt.reader();

        assert_eq!(r.read_v3f().unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(r.read_v3f().unwrap(), Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(r.read_f32().unwrap(), 0.5);
        assert_eq!(r.read_f32().unwrap(), -1.5);
        assert_eq!(
            ControlFlags::from_bits_truncate(r.read_u32().unwrap()),
            ControlFlags::FORWARD | ControlFlags::JUMP
        );
        assert_eq!(r.read_f32().unwrap(), 72.0);
        assert_eq!(r.read_u8().unwrap(), 10);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn hud_params_are_stored_per_element() {
        let mut player = LocalPlayer::new("ada".into(), 72.0, 10);
        player.set_hud_param(3, "text".into(), "hello".into());
        player.set_hud_param(3, "scale".into(), "2".into());
        player.set_hud_param(4, "text".into(), "other".into());

        assert_eq!(player.hud_param(3, "text"), Some("hello"));
        assert_eq!(player.hud_param(3, "scale"), Some("2"));
        assert_eq!(player.hud_param(4, "text"), Some("other"));
        assert_eq!(player.hud_param(5, "text"), None);
    }
}
