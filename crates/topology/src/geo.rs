//! Great-circle distance and propagation delay

/// Mean earth radius used by the spherical distance model, in km.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Speed of light in km per millisecond.
pub const LIGHT_KM_PER_MS: f64 = 299.792458;

/// Geodetic position in degrees / km.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPos {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_km: f64,
}

/// Haversine distance on a spherical earth.
///
/// Altitude is deliberately not part of the model: for the orbits this
/// emulator targets the surface arc is the dominant term, and keeping
/// the formula two-dimensional keeps the per-tick delay stable.
pub fn great_circle_km(a: GeoPos, b: GeoPos) -> f64 {
    let lat1 = a.lat_deg.to_radians();
    let lat2 = b.lat_deg.to_radians();
    let sa = ((lat1 - lat2) / 2.0).sin();
    let sb = ((a.lon_deg.to_radians() - b.lon_deg.to_radians()) / 2.0).sin();
    2.0 * EARTH_RADIUS_KM
        * (sa * sa + lat1.cos() * lat2.cos() * sb * sb).sqrt().asin()
}

/// One-way propagation delay between two nodes in milliseconds.
pub fn propagation_delay_ms(a: GeoPos, b: GeoPos) -> f64 {
    great_circle_km(a, b) / LIGHT_KM_PER_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(lat: f64, lon: f64) -> GeoPos {
        GeoPos {
            lat_deg: lat,
            lon_deg: lon,
            alt_km: 0.0,
        }
    }

    #[test]
    fn quarter_meridian_distance() {
        // Equator to a point 90 degrees east: a quarter of the great circle.
        let d = great_circle_km(at(0.0, 0.0), at(0.0, 90.0));
        let expected = std::f64::consts::PI * EARTH_RADIUS_KM / 2.0;
        assert!((d - expected).abs() < 1e-6, "d = {d}");

        let delay = propagation_delay_ms(at(0.0, 0.0), at(0.0, 90.0));
        assert!((delay - expected / LIGHT_KM_PER_MS).abs() < 1e-9);
        assert!((delay - 33.381).abs() < 0.01, "delay = {delay}");
    }

    #[test]
    fn symmetric_and_zero_on_self() {
        let f = at(50.110924, 8.682127);
        let k = at(46.6357, 14.311817);
        assert_eq!(great_circle_km(f, k), great_circle_km(k, f));
        assert_eq!(great_circle_km(f, f), 0.0);
    }

    #[test]
    fn altitude_does_not_enter_the_model() {
        let lo = at(10.0, 10.0);
        let hi = GeoPos {
            alt_km: 550.0,
            ..lo
        };
        assert_eq!(
            great_circle_km(lo, at(20.0, 20.0)),
            great_circle_km(hi, at(20.0, 20.0))
        );
    }
}
