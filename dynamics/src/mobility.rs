//! Vessel mobility.
//!
//! Vessels walk their waypoint polyline at a constant angular step per
//! tick, snapping to a waypoint once within one step of it and ping-ponging
//! at the polyline's endpoints. Deliberately crude — vessels only drive
//! uplink visibility, not orbital mechanics, so great-circle accuracy buys
//! nothing here.

/// Angular step per tick, in degrees.
pub const SPEED: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct VesselTrack {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    waypoints: Vec<(f64, f64)>,
    current: usize,
    next: usize,
    forward: bool,
}

impl VesselTrack {
    pub fn new(name: impl Into<String>, waypoints: Vec<(f64, f64)>) -> Self {
        let (lat, lon) = waypoints.first().copied().unwrap_or((0.0, 0.0));
        Self {
            name: name.into(),
            lat,
            lon,
            waypoints,
            current: 0,
            next: 1,
            forward: true,
        }
    }

    /// Advance one tick. Position is static for degenerate polylines.
    pub fn update_position(&mut self) {
        if self.waypoints.len() < 2 {
            return;
        }

        let current_wp = self.waypoints[self.current];
        let next_wp = self.waypoints[self.next];

        let delta_lat = next_wp.0 - current_wp.0;
        let delta_lon = next_wp.1 - current_wp.1;
        let leg_len = (delta_lat * delta_lat + delta_lon * delta_lon).sqrt();

        let (move_lat, move_lon) = if leg_len > 0.0 {
            (delta_lat / leg_len * SPEED, delta_lon / leg_len * SPEED)
        } else {
            (0.0, 0.0)
        };

        let mut new_lat = self.lat + move_lat;
        let mut new_lon = self.lon + move_lon;

        let remaining = ((new_lat - next_wp.0).powi(2) + (new_lon - next_wp.1).powi(2)).sqrt();
        if remaining < SPEED {
            // Snap to the waypoint and advance the cursor, reversing at
            // either end of the polyline.
            new_lat = next_wp.0;
            new_lon = next_wp.1;

            if self.forward {
                if self.next == self.waypoints.len() - 1 {
                    self.forward = false;
                    self.current = self.next;
                    self.next = self.current - 1;
                } else {
                    self.current = self.next;
                    self.next += 1;
                }
            } else if self.next == 0 {
                self.forward = true;
                self.current = 0;
                self.next = 1;
            } else {
                self.current = self.next;
                self.next -= 1;
            }
        }

        self.lat = new_lat;
        self.lon = new_lon;
    }
}
