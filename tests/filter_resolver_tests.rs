mod common;

use std::sync::Arc;

use carnet_server::carnet::{CarnetError, CarnetFilters};
use carnet_server::people::{
    EducationLevel, FilterResolver, InMemoryPersonDirectory, KindFilter, PersonDirectory,
    PersonFilter, PersonKey,
};
use carnet_server::TenantId;
use common::*;

const TENANT: TenantId = TenantId(1);

fn school() -> Arc<InMemoryPersonDirectory> {
    let directory = Arc::new(InMemoryPersonDirectory::new());
    for id in 1..=4 {
        directory.insert(student(TENANT, id, "3", "A"));
    }
    for id in 5..=6 {
        directory.insert(student(TENANT, id, "3", "B"));
    }
    let mut secundaria = student(TENANT, 7, "1", "A");
    secundaria.level = Some(EducationLevel::Secundaria);
    directory.insert(secundaria);
    for id in [20, 10] {
        directory.insert(teacher(TENANT, id));
    }
    directory.insert(student(TenantId(2), 99, "3", "A"));
    directory
}

#[tokio::test]
async fn test_count_matches_listed_keys() {
    let directory = school();
    let filters = [
        PersonFilter::default(),
        PersonFilter {
            kind: KindFilter::Student,
            ..PersonFilter::default()
        },
        PersonFilter {
            kind: KindFilter::Teacher,
            ..PersonFilter::default()
        },
        PersonFilter {
            section: Some("B".to_string()),
            ..PersonFilter::default()
        },
    ];

    for filter in filters {
        let count = directory.count(TENANT, &filter).await.unwrap();
        let keys = directory.list_keys(TENANT, &filter).await.unwrap();
        assert_eq!(count, keys.len() as u64, "mismatch for {:?}", filter);
    }
}

#[tokio::test]
async fn test_all_lists_students_before_teachers() {
    let resolver = FilterResolver::new(school());
    let resolution = resolver
        .resolve(TENANT, &PersonFilter::default())
        .await
        .unwrap();

    assert_eq!(resolution.count, 9);
    let expected: Vec<PersonKey> = (1..=7)
        .map(PersonKey::student)
        .chain([PersonKey::teacher(10), PersonKey::teacher(20)])
        .collect();
    assert_eq!(resolution.keys, expected);
}

#[tokio::test]
async fn test_filters_combine_with_and() {
    let resolver = FilterResolver::new(school());
    let filter = PersonFilter {
        kind: KindFilter::Student,
        level: Some(EducationLevel::Primaria),
        grade: Some("3".to_string()),
        section: Some("A".to_string()),
    };

    let resolution = resolver.resolve(TENANT, &filter).await.unwrap();
    assert_eq!(resolution.count, 4);
    assert_eq!(
        resolution.keys,
        (1..=4).map(PersonKey::student).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_teacher_filter_excludes_students() {
    let resolver = FilterResolver::new(school());
    let filter = PersonFilter {
        kind: KindFilter::Teacher,
        ..PersonFilter::default()
    };
    let resolution = resolver.resolve(TENANT, &filter).await.unwrap();
    assert_eq!(
        resolution.keys,
        vec![PersonKey::teacher(10), PersonKey::teacher(20)]
    );
}

#[tokio::test]
async fn test_zero_matches_is_no_match() {
    let resolver = FilterResolver::new(school());
    let filter = PersonFilter {
        level: Some(EducationLevel::Inicial),
        ..PersonFilter::default()
    };
    assert_eq!(
        resolver.resolve(TENANT, &filter).await.unwrap_err(),
        CarnetError::NoMatch
    );
}

#[tokio::test]
async fn test_empty_tenant_is_no_match() {
    let resolver = FilterResolver::new(school());
    assert_eq!(
        resolver
            .resolve(TenantId(404), &PersonFilter::default())
            .await
            .unwrap_err(),
        CarnetError::NoMatch
    );
}

#[tokio::test]
async fn test_request_filters_normalize_all_and_blanks() {
    let filters = CarnetFilters {
        kind: Some("all".to_string()),
        level: Some("primaria".to_string()),
        grade: Some("".to_string()),
        section: Some(" A ".to_string()),
    };

    let normalized = filters.normalize().unwrap();
    assert_eq!(normalized.kind, KindFilter::All);
    assert_eq!(normalized.level, Some(EducationLevel::Primaria));
    assert_eq!(normalized.grade, None);
    assert_eq!(normalized.section.as_deref(), Some("A"));

    let resolution = FilterResolver::new(school())
        .resolve(TENANT, &normalized)
        .await
        .unwrap();
    assert_eq!(resolution.count, 4);
}

#[tokio::test]
async fn test_section_matches_exactly_as_stored() {
    let directory = Arc::new(InMemoryPersonDirectory::new());
    directory.insert(student(TENANT, 1, "3", "a"));
    directory.insert(student(TENANT, 2, "3", "A"));
    let resolver = FilterResolver::new(directory);

    let lowercase = CarnetFilters {
        kind: Some("student".to_string()),
        level: None,
        grade: Some("3".to_string()),
        section: Some("a".to_string()),
    }
    .normalize()
    .unwrap();
    assert_eq!(lowercase.section.as_deref(), Some("a"));

    let resolution = resolver.resolve(TENANT, &lowercase).await.unwrap();
    assert_eq!(resolution.keys, vec![PersonKey::student(1)]);

    let uppercase = PersonFilter {
        section: Some("A".to_string()),
        ..lowercase
    };
    let resolution = resolver.resolve(TENANT, &uppercase).await.unwrap();
    assert_eq!(resolution.keys, vec![PersonKey::student(2)]);
}
