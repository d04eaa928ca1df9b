use std::path::PathBuf;

use inat_downloader::output::path::collection_stem;
use inat_downloader::output::ResultsLayout;
use inat_downloader::{MediaRef, Record, SizeVariant};

#[test]
fn collection_stem_replaces_spaces() {
    assert_eq!(collection_stem("Danaus plexippus"), "Danaus_plexippus");
    assert_eq!(collection_stem("  Apis mellifera "), "Apis_mellifera");
    assert_eq!(collection_stem("Quercus robur/petraea"), "Quercus_robur_petraea");
}

#[test]
fn image_path_lives_in_species_folder() {
    let layout = ResultsLayout::new("/data/results");
    let record = Record {
        id: 77,
        taxon_name: Some("Vespa crabro".to_string()),
        license_code: Some("cc0".to_string()),
        observer_login: Some("bob".to_string()),
        quality_grade: None,
        observed_on: None,
        latitude: None,
        longitude: None,
        media_refs: vec![],
    };
    assert_eq!(
        layout.image_path("Vespa crabro", &record, 1),
        PathBuf::from("/data/results/Vespa_crabro_images/Vespa-crabro_bob_cc0_77_1.jpeg")
    );
}

#[test]
fn media_variant_substitution() {
    let square = MediaRef::new(
        "https://inaturalist-open-data.s3.amazonaws.com/photos/1234/square.jpeg",
        SizeVariant::Square,
    );
    let original = square.with_variant(SizeVariant::Original);
    assert_eq!(
        original.source_url,
        "https://inaturalist-open-data.s3.amazonaws.com/photos/1234/original.jpeg"
    );
    assert_eq!(original.size_variant, SizeVariant::Original);

    // No variant segment: URL left alone
    let odd = MediaRef::new("https://example.org/p/1.jpg", SizeVariant::Square);
    assert_eq!(
        odd.with_variant(SizeVariant::Large).source_url,
        "https://example.org/p/1.jpg"
    );
}
