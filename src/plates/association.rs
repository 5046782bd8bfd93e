use crate::detect::Track;
use crate::frame::BoxCorners;

/// The track a plate belongs to: among the tracks whose box fully encloses the
/// plate, the one with the smallest box. Equal areas go to the lowest track id.
pub fn associate<'a>(tracks: &'a [Track], plate: &BoxCorners) -> Option<&'a Track> {
    tracks
        .iter()
        .filter(|track| track.bbox.encloses(plate))
        .min_by(|a, b| {
            a.bbox
                .area()
                .total_cmp(&b.bbox.area())
                .then(a.track_id.cmp(&b.track_id))
        })
}
