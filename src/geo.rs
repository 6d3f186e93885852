/*!
 * Geographic types and calculations.
 *
 * Nothing here accounts for parallax, GLM already geo-locates its detections onto an assumed
 * lightning ellipsoid before the data is published.
 */

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

/// An area aligned with latitude and longitude lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// The lower left (southwest) corner.
    pub ll: Coord,
    /// The upper right (northeast) corner.
    pub ur: Coord,
}

impl BoundingBox {
    /// The whole globe.
    pub fn globe() -> Self {
        BoundingBox {
            ll: Coord {
                lat: -90.0,
                lon: -180.0,
            },
            ur: Coord {
                lat: 90.0,
                lon: 180.0,
            },
        }
    }

    /// Is the coordinate inside or on the edge of the box?
    pub fn contains(&self, coord: Coord) -> bool {
        coord.lat >= self.ll.lat
            && coord.lat <= self.ur.lat
            && coord.lon >= self.ll.lon
            && coord.lon <= self.ur.lon
    }
}

/**
 * The simple great circle distance calculation.
 *
 * #Arguments
 * * lat1 - the latitude of the first point in degrees.
 * * lon1 - the longitude of the first point in degrees.
 * * lat2 - the latitude of the second point in degrees.
 * * lon2 - the longitude of the second point in degrees.
 *
 * #Returns
 * The distance between the points in kilometers.
 */
pub fn great_circle_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0090;

    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let sin2_dlat = ((lat2_r - lat1_r) / 2.0).sin().powi(2);
    let sin2_dlon = ((lon2 - lon1).to_radians() / 2.0).sin().powi(2);

    let arc = 2.0 * (sin2_dlat + sin2_dlon * lat1_r.cos() * lat2_r.cos()).sqrt().asin();

    arc * EARTH_RADIUS_KM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = great_circle_distance(45.0, -120.0, 46.0, -120.0);
        assert!((d - 111.2).abs() < 0.1, "{}", d);

        assert_eq!(great_circle_distance(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn bounding_box_contains_its_edges() {
        let bbox = BoundingBox {
            ll: Coord {
                lat: 30.0,
                lon: -100.0,
            },
            ur: Coord {
                lat: 40.0,
                lon: -90.0,
            },
        };

        assert!(bbox.contains(Coord {
            lat: 35.0,
            lon: -95.0
        }));
        assert!(bbox.contains(Coord {
            lat: 40.0,
            lon: -90.0
        }));
        assert!(!bbox.contains(Coord {
            lat: 41.0,
            lon: -95.0
        }));
        assert!(BoundingBox::globe().contains(Coord {
            lat: -89.0,
            lon: 179.0
        }));
    }
}
