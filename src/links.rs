use crate::models::{DisplayRow, Location, RowKind};

pub const TILE_URL_TEMPLATE: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const TILE_ATTRIBUTION: &str = "&copy; OpenStreetMap contributors";
pub const TILE_MAX_ZOOM: u8 = 19;

pub fn dashboard_route() -> &'static str {
    "/"
}

pub fn detail_route(id: &str) -> String {
    format!("/detail/{}", urlencoding::encode(id))
}

pub fn project_route(name: &str) -> String {
    format!("/project/{}", urlencoding::encode(name))
}

/// Drill-down route for a row; singles without an id have none.
pub fn row_route(row: &DisplayRow) -> Option<String> {
    match row.kind {
        RowKind::Project => Some(project_route(&row.key)),
        RowKind::Single if row.key.is_empty() => None,
        RowKind::Single => Some(detail_route(&row.key)),
    }
}

/// "Open in external map" link. Coordinates are plain numbers, so nothing
/// needs escaping.
pub fn external_map_link(location: Location) -> String {
    format!(
        "https://www.google.com/maps?q={},{}",
        location.latitude, location.longitude
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_are_encoded() {
        assert_eq!(dashboard_route(), "/");
        assert_eq!(detail_route("65f0c1"), "/detail/65f0c1");
        assert_eq!(project_route("Kebun Teh/Blok 2"), "/project/Kebun%20Teh%2FBlok%202");
    }

    #[test]
    fn external_link_interpolates_coordinates() {
        let loc = Location::new(-6.595, 106.816).unwrap();
        assert_eq!(
            external_map_link(loc),
            "https://www.google.com/maps?q=-6.595,106.816"
        );
    }
}
