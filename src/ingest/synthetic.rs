//! Deterministic synthetic scenes behind `stub://` locations.
//!
//! - `stub://parking`: asphalt with a 2x5 grid of painted bays. Cars arrive and
//!   leave on per-bay schedules. `parking_grid` returns the matching layout.
//! - `stub://traffic`: red vehicles carrying a white plate drive across two lanes.
//! - anything else: a moving gradient with no objects.
//!
//! Frames depend only on the scene, the frame size and the frame position, so a
//! rewound stream replays exactly.

use crate::frame::{Frame, Roi};

const ASPHALT: [u8; 3] = [70, 70, 70];
const BAY_LINE: [u8; 3] = [230, 230, 230];
const ROAD: [u8; 3] = [90, 90, 90];

/// Vehicle body color in the traffic scene.
pub const VEHICLE_COLOR: [u8; 3] = [200, 30, 30];
/// Plate background color in the traffic scene.
pub const PLATE_COLOR: [u8; 3] = [240, 240, 240];
const PLATE_INK: [u8; 3] = [20, 20, 20];

const VEHICLE_W: u32 = 160;
const VEHICLE_H: u32 = 90;
const PLATE_W: u32 = 64;
const PLATE_H: u32 = 18;
const VEHICLE_SPEED: u32 = 6;
const VEHICLE_SPAWN_EVERY: u64 = 70;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticScene {
    Parking,
    Traffic,
    Gradient,
}

impl SyntheticScene {
    /// Scene for a `stub://<name>` location.
    pub fn from_location(location: &str) -> Self {
        let name = location.trim_start_matches("stub://");
        let name = name.split(['/', '?']).next().unwrap_or_default();
        match name {
            "parking" => SyntheticScene::Parking,
            "traffic" => SyntheticScene::Traffic,
            _ => SyntheticScene::Gradient,
        }
    }

    /// Render frame number `position` (0-based).
    pub fn render(&self, width: u32, height: u32, position: u64) -> Frame {
        match self {
            SyntheticScene::Parking => render_parking(width, height, position),
            SyntheticScene::Traffic => render_traffic(width, height, position),
            SyntheticScene::Gradient => render_gradient(width, height, position),
        }
    }
}

/// Bay layout painted by the parking scene.
pub fn parking_grid(width: u32, height: u32) -> Vec<Roi> {
    let cell_w = width / 6;
    let bay_w = cell_w * 3 / 4;
    let bay_h = height / 4;
    let mut bays = Vec::with_capacity(10);
    for row in 0..2u32 {
        let y = height / 8 + row * (height / 2);
        for col in 0..5u32 {
            let x = cell_w / 2 + col * cell_w + (cell_w - bay_w) / 2;
            bays.push(Roi::new(x, y, bay_w, bay_h));
        }
    }
    bays
}

/// Whether bay `index` holds a car at frame `position`.
pub fn parking_bay_occupied(index: usize, position: u64) -> bool {
    let period = 90 + 30 * index as u64;
    (position / period + index as u64) % 3 != 0
}

fn render_parking(width: u32, height: u32, position: u64) -> Frame {
    let mut frame = Frame::filled(width, height, ASPHALT);
    for (index, bay) in parking_grid(width, height).iter().enumerate() {
        // Painted lines sit just outside the bay so an empty bay is uniform.
        if bay.x >= 3 {
            frame.fill_rect(&Roi::new(bay.x - 3, bay.y, 2, bay.height), BAY_LINE);
        }
        frame.fill_rect(&Roi::new(bay.x + bay.width + 1, bay.y, 2, bay.height), BAY_LINE);

        if parking_bay_occupied(index, position) {
            let shade = 150 + (index as u8 % 5) * 20;
            let body = Roi::new(
                bay.x + bay.width / 8,
                bay.y + bay.height / 10,
                bay.width * 3 / 4,
                bay.height * 4 / 5,
            );
            frame.fill_rect(&body, [shade, shade - 20, 60]);
            let windshield = Roi::new(
                body.x + body.width / 6,
                body.y + body.height / 5,
                body.width * 2 / 3,
                body.height / 5,
            );
            frame.fill_rect(&windshield, [25, 35, 50]);
        }
    }
    frame
}

/// A vehicle of the traffic scene visible at some frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyntheticVehicle {
    pub serial: u64,
    /// Left edge; may be negative while the vehicle enters the frame.
    pub x: i64,
    pub y: u32,
}

/// Vehicles present at frame `position`.
pub fn traffic_vehicles(width: u32, height: u32, position: u64) -> Vec<SyntheticVehicle> {
    let travel = (width + VEHICLE_W) as u64 / VEHICLE_SPEED as u64 + 1;
    let first = position.saturating_sub(travel) / VEHICLE_SPAWN_EVERY;
    let last = position / VEHICLE_SPAWN_EVERY;
    (first..=last)
        .filter_map(|serial| {
            let spawned = serial * VEHICLE_SPAWN_EVERY;
            let age = position.checked_sub(spawned)?;
            let x = age as i64 * VEHICLE_SPEED as i64 - VEHICLE_W as i64;
            if x >= width as i64 {
                return None;
            }
            let lane = (serial % 2) as u32;
            let y = height / 6 + lane * (height / 2);
            Some(SyntheticVehicle { serial, x, y })
        })
        .collect()
}

fn render_traffic(width: u32, height: u32, position: u64) -> Frame {
    let mut frame = Frame::filled(width, height, ROAD);
    for vehicle in traffic_vehicles(width, height, position) {
        paint_clipped(&mut frame, vehicle.x, vehicle.y, VEHICLE_W, VEHICLE_H, VEHICLE_COLOR);

        let plate_x = vehicle.x + ((VEHICLE_W - PLATE_W) / 2) as i64;
        let plate_y = vehicle.y + VEHICLE_H - PLATE_H - 8;
        paint_clipped(&mut frame, plate_x, plate_y, PLATE_W, PLATE_H, PLATE_COLOR);

        // Glyph stripes encode the serial so each plate reads differently.
        let code = vehicle.serial.wrapping_mul(37).wrapping_add(11);
        for slot in 0..7u32 {
            if code >> slot & 1 == 1 {
                let gx = plate_x + 4 + (slot * 8) as i64;
                paint_clipped(&mut frame, gx, plate_y + 4, 4, PLATE_H - 8, PLATE_INK);
            }
        }
    }
    frame
}

fn paint_clipped(frame: &mut Frame, x: i64, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
    let x0 = x.max(0);
    let x1 = (x + w as i64).min(frame.width as i64);
    if x1 <= x0 {
        return;
    }
    frame.fill_rect(&Roi::new(x0 as u32, y, (x1 - x0) as u32, h), rgb);
}

fn render_gradient(width: u32, height: u32, position: u64) -> Frame {
    let mut data = vec![0u8; width as usize * height as usize * 3];
    for (i, pixel) in data.iter_mut().enumerate() {
        *pixel = ((i as u64 + position) % 256) as u8;
    }
    Frame::new(data, width, height).unwrap_or_else(|_| Frame::filled(width, height, [0, 0, 0]))
}
