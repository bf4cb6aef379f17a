/// Mean radius of the earth in meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance in meters between two `(latitude, longitude)` pairs
/// given in degrees. Both points are taken to be at sea level.
pub fn haversine_distance(p1: (f64, f64), p2: (f64, f64)) -> f64 {
    let d_lat = (p2.0 - p1.0).to_radians();
    let d_lon = (p2.1 - p1.1).to_radians();
    let lat1 = p1.0.to_radians();
    let lat2 = p2.0.to_radians();

    let a = f64::sin(d_lat / 2.).powi(2)
        + f64::cos(lat1) * f64::cos(lat2) * f64::sin(d_lon / 2.).powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points
    let c = 2. * f64::asin(f64::sqrt(a.min(1.0)));

    EARTH_RADIUS_METERS * c
}

pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
