//! Advertisement matching for the two product lines.

use crate::domain::models::ProductLine;
use crate::infrastructure::bluetooth::protocol::{DeviceProfile, INSOLE_PRODUCT_CODE};
use crate::infrastructure::bluetooth::transport::Advertisement;
use tracing::trace;

/// Company id the insole firmware advertises its product code under.
const INSOLE_COMPANY_ID: u16 = 0;

/// Decide whether an advertisement belongs to the profile's product line.
///
/// Insoles must carry a company 0 payload. They match on its product code,
/// or on the name when the code is absent.
pub fn matches(profile: &DeviceProfile, adv: &Advertisement) -> bool {
    let name_matches = adv
        .identity
        .name
        .as_deref()
        .is_some_and(|name| name.contains(profile.name_prefix));

    let matched = match profile.product_line {
        ProductLine::Core => name_matches,
        ProductLine::Insole => match adv.manufacturer_payload(INSOLE_COMPANY_ID) {
            Some(data) => has_insole_product_code(data) || name_matches,
            None => false,
        },
    };
    trace!(
        "Advertisement {:?} ({}): match={}",
        adv.identity.name,
        adv.identity.address,
        matched
    );
    matched
}

fn has_insole_product_code(data: &[u8]) -> bool {
    data.len() > 4 && data[..2] == INSOLE_PRODUCT_CODE
}
