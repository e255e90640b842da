//! Species to scientific-name lookup. Extend by adding rows, not code.

pub const UNKNOWN_SPECIES: &str = "Unknown Species";

static SCIENTIFIC_NAMES: &[(&str, &str)] = &[
    ("beaver", "Castor canadensis"),
    ("bobcat", "Lynx rufus"),
    ("coyote", "Canis latrans"),
    ("striped skunk", "Mephitis mephitis"),
    ("opossum", "Didelphis virginiana"),
    ("bt deer", "Odocoileus hemionus columbianus"), // black-tailed deer
    ("gray fox", "Urocyon cinereoargenteus"),
    ("raccoon", "Procyon lotor"),
    ("desert cottontail", "Sylvilagus audubonii"),
    ("fox squirrel", "Sciurus niger"),
    ("ca ground squirrel", "Otospermophilus beecheyi"),
    ("ca quail", "Callipepla californica"),
    ("golden-crown sparrow", "Zonotrichia atricapilla"),
    ("wild turkey", "Meleagris gallopavo"),
    ("river otter", "Lontra canadensis"),
    ("ca scrub jay", "Aphelocoma californica"),
    ("american badger", "Taxidea taxus"),
    ("ca towhee", "Melozone crissalis"),
    ("northern mockingbird", "Mimus polyglottos"),
    ("anna's hummingbird", "Calypte anna"),
    ("raptor", "Raptor sp."),   // any bird of prey
    ("frog sp.", "Anura sp."), // any frog or toad
];

/// Case-insensitive lookup; labels the table does not know get a fixed
/// placeholder.
pub fn scientific_name(species: &str) -> &'static str {
    SCIENTIFIC_NAMES
        .iter()
        .find(|(common, _)| common.eq_ignore_ascii_case(species))
        .map(|(_, scientific)| *scientific)
        .unwrap_or(UNKNOWN_SPECIES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_species() {
        assert_eq!(scientific_name("raccoon"), "Procyon lotor");
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(scientific_name("Gray Fox"), "Urocyon cinereoargenteus");
    }

    #[test]
    fn unknown_species_gets_placeholder() {
        assert_eq!(scientific_name("chupacabra"), UNKNOWN_SPECIES);
    }
}
