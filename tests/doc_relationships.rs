//! End-to-end relationship coverage against the in-memory document store.

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use desmos::{
    CascadeMode, ColumnType, Condition, DocEngine, EntityDescriptor, Error, GenerationStrategy,
    HandlerRegistry, Id, IdKind, MemoryStore, QueryOptions, Record, RelationDescriptor,
    RelationElement,
};

static AUTHOR: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::builder("author")
        .primary_key("id", IdKind::Oid, GenerationStrategy::Auto)
        .column("name", ColumnType::Text)
        .created_at("createdAt")
        .updated_at("updatedAt")
        .soft_delete("deleted")
        .relation(
            "books",
            RelationDescriptor::many_to_many(|| &BOOK, RelationElement::Id(IdKind::Oid))
                .remote_field("authors"),
        )
        .build()
});

static BOOK: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::builder("book")
        .primary_key("id", IdKind::Oid, GenerationStrategy::Auto)
        .column("title", ColumnType::Text)
        .soft_delete("deleted")
        .relation(
            "authors",
            RelationDescriptor::many_to_many(|| &AUTHOR, RelationElement::Id(IdKind::Oid))
                .remote_field("books"),
        )
        .build()
});

static NODE: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::builder("node")
        .primary_key("id", IdKind::Oid, GenerationStrategy::Auto)
        .column("name", ColumnType::Text)
        .soft_delete("deleted")
        .relation(
            "children",
            RelationDescriptor::one_to_many(|| &LEAF, RelationElement::Id(IdKind::Oid))
                .mapped_by("parent")
                .cascade_update(CascadeMode::SetNull)
                .cascade_delete(CascadeMode::Delete),
        )
        .build()
});

static LEAF: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::builder("leaf")
        .primary_key("id", IdKind::Oid, GenerationStrategy::Auto)
        .column("name", ColumnType::Text)
        .soft_delete("deleted")
        .relation(
            "parent",
            RelationDescriptor::many_to_one(|| &NODE, RelationElement::Id(IdKind::Oid))
                .remote_field("children"),
        )
        .build()
});

static GROVE: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::builder("grove")
        .primary_key("id", IdKind::Oid, GenerationStrategy::Auto)
        .column("name", ColumnType::Text)
        .soft_delete("deleted")
        .relation(
            "sprigs",
            RelationDescriptor::one_to_many(|| &SPRIG, RelationElement::Id(IdKind::Oid))
                .mapped_by("grove")
                .cascade_update(CascadeMode::Ignore)
                .cascade_delete(CascadeMode::Ignore),
        )
        .build()
});

static SPRIG: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::builder("sprig")
        .primary_key("id", IdKind::Oid, GenerationStrategy::Auto)
        .column("name", ColumnType::Text)
        .soft_delete("deleted")
        .relation(
            "grove",
            RelationDescriptor::many_to_one(|| &GROVE, RelationElement::Id(IdKind::Oid))
                .remote_field("sprigs"),
        )
        .build()
});

static TEAM: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::builder("team")
        .primary_key("id", IdKind::Long, GenerationStrategy::Auto)
        .column("name", ColumnType::Text)
        .relation(
            "members",
            RelationDescriptor::many_to_many(|| &PERSON, RelationElement::Entity)
                .remote_field("teams"),
        )
        .build()
});

static PERSON: Lazy<EntityDescriptor> = Lazy::new(|| {
    EntityDescriptor::builder("person")
        .primary_key("id", IdKind::Long, GenerationStrategy::Auto)
        .column("name", ColumnType::Text)
        .relation(
            "teams",
            RelationDescriptor::many_to_many(|| &TEAM, RelationElement::Id(IdKind::Long))
                .remote_field("members"),
        )
        .build()
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Author {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    #[serde(rename = "updatedAt")]
    updated_at: Option<String>,
    books: Option<Vec<String>>,
}

impl Record for Author {
    fn descriptor() -> &'static EntityDescriptor {
        &AUTHOR
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Book {
    id: Option<String>,
    title: Option<String>,
    authors: Option<Vec<String>>,
}

impl Record for Book {
    fn descriptor() -> &'static EntityDescriptor {
        &BOOK
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Node {
    id: Option<String>,
    name: Option<String>,
    children: Option<Vec<String>>,
}

impl Record for Node {
    fn descriptor() -> &'static EntityDescriptor {
        &NODE
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Leaf {
    id: Option<String>,
    name: Option<String>,
    parent: Option<String>,
}

impl Record for Leaf {
    fn descriptor() -> &'static EntityDescriptor {
        &LEAF
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Grove {
    id: Option<String>,
    name: Option<String>,
    sprigs: Option<Vec<String>>,
}

impl Record for Grove {
    fn descriptor() -> &'static EntityDescriptor {
        &GROVE
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sprig {
    id: Option<String>,
    name: Option<String>,
    grove: Option<String>,
}

impl Record for Sprig {
    fn descriptor() -> &'static EntityDescriptor {
        &SPRIG
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Team {
    id: Option<i64>,
    name: Option<String>,
    members: Option<Vec<Person>>,
}

impl Record for Team {
    fn descriptor() -> &'static EntityDescriptor {
        &TEAM
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Person {
    id: Option<i64>,
    name: Option<String>,
    teams: Option<Vec<i64>>,
}

impl Record for Person {
    fn descriptor() -> &'static EntityDescriptor {
        &PERSON
    }
}

fn context() -> (Arc<MemoryStore>, DocEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = DocEngine::new(store.clone(), Arc::new(HandlerRegistry::standard()));
    (store, engine)
}

fn oid(id: &Option<String>) -> Id {
    Id::Oid(id.clone().unwrap())
}

#[tokio::test]
async fn generated_keys_follow_the_declared_kind() {
    let (_store, engine) = context();

    let author = engine
        .insert(&Author {
            name: Some("ann".into()),
            ..Author::default()
        })
        .await
        .unwrap();
    let id = author.id.unwrap();
    assert_eq!(id.len(), 24);
    assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    assert!(author.created_at.is_some());

    // Integer keys come from the per-collection counter.
    for expected in 1..=2i64 {
        let person = engine
            .insert(&Person {
                name: Some(format!("p{}", expected)),
                ..Person::default()
            })
            .await
            .unwrap();
        assert_eq!(person.id, Some(expected));
    }
}

#[tokio::test]
async fn many_to_many_mirror_stays_consistent() {
    let (_store, engine) = context();

    let book = engine
        .insert(&Book {
            title: Some("dune".into()),
            ..Book::default()
        })
        .await
        .unwrap();
    let author = engine
        .insert(&Author {
            name: Some("frank".into()),
            books: Some(vec![book.id.clone().unwrap()]),
            ..Author::default()
        })
        .await
        .unwrap();

    let found: Book = engine.get_by_id(&oid(&book.id)).await.unwrap();
    assert_eq!(found.authors, Some(vec![author.id.clone().unwrap()]));

    // Emptying the list pulls this author from the mirror.
    let mut changed = author.clone();
    changed.books = Some(Vec::new());
    engine.update(&oid(&author.id), &changed).await.unwrap();
    let found: Book = engine.get_by_id(&oid(&book.id)).await.unwrap();
    assert_eq!(found.authors, None);

    engine
        .add_link::<Author>(&oid(&author.id), "books", &oid(&book.id))
        .await
        .unwrap();
    let found: Author = engine.get_by_id(&oid(&author.id)).await.unwrap();
    assert_eq!(found.books, Some(vec![book.id.clone().unwrap()]));
    let found: Book = engine.get_by_id(&oid(&book.id)).await.unwrap();
    assert_eq!(found.authors, Some(vec![author.id.clone().unwrap()]));

    engine
        .remove_link::<Author>(&oid(&author.id), "books", &oid(&book.id))
        .await
        .unwrap();
    let found: Author = engine.get_by_id(&oid(&author.id)).await.unwrap();
    assert_eq!(found.books, None);
    let found: Book = engine.get_by_id(&oid(&book.id)).await.unwrap();
    assert_eq!(found.authors, None);
}

#[tokio::test]
async fn reparenting_maintains_both_sides() {
    let (_store, engine) = context();

    let first = engine
        .insert(&Node {
            name: Some("first".into()),
            ..Node::default()
        })
        .await
        .unwrap();
    let second = engine
        .insert(&Node {
            name: Some("second".into()),
            ..Node::default()
        })
        .await
        .unwrap();

    let leaf = engine
        .insert(&Leaf {
            name: Some("leaf".into()),
            parent: first.id.clone(),
            ..Leaf::default()
        })
        .await
        .unwrap();
    let found: Node = engine.get_by_id(&oid(&first.id)).await.unwrap();
    assert_eq!(found.children, Some(vec![leaf.id.clone().unwrap()]));

    let mut moved = leaf.clone();
    moved.parent = second.id.clone();
    engine.update(&oid(&leaf.id), &moved).await.unwrap();

    let found: Node = engine.get_by_id(&oid(&first.id)).await.unwrap();
    assert_eq!(found.children, None);
    let found: Node = engine.get_by_id(&oid(&second.id)).await.unwrap();
    assert_eq!(found.children, Some(vec![leaf.id.clone().unwrap()]));
    let found: Leaf = engine.get_by_id(&oid(&leaf.id)).await.unwrap();
    assert_eq!(found.parent, second.id);
}

#[tokio::test]
async fn update_and_delete_cascades_stay_separate() {
    let (_store, engine) = context();

    let node = engine
        .insert(&Node {
            name: Some("root".into()),
            ..Node::default()
        })
        .await
        .unwrap();
    let kept_out = engine
        .insert(&Leaf {
            name: Some("out".into()),
            parent: node.id.clone(),
            ..Leaf::default()
        })
        .await
        .unwrap();
    let kept_in = engine
        .insert(&Leaf {
            name: Some("in".into()),
            parent: node.id.clone(),
            ..Leaf::default()
        })
        .await
        .unwrap();

    // Shrinking the list applies the update policy: SetNull, not delete.
    let mut shrunk: Node = engine.get_by_id(&oid(&node.id)).await.unwrap();
    shrunk.children = Some(vec![kept_in.id.clone().unwrap()]);
    engine.update(&oid(&node.id), &shrunk).await.unwrap();

    let found: Leaf = engine.get_by_id(&oid(&kept_out.id)).await.unwrap();
    assert_eq!(found.parent, None);

    // Deleting the parent applies the delete policy to the remaining child.
    engine.delete::<Node>(&oid(&node.id)).await.unwrap();
    assert!(matches!(
        engine.get_by_id::<Leaf>(&oid(&kept_in.id)).await,
        Err(Error::NotFound)
    ));
    // The detached leaf is untouched by the delete cascade.
    let found: Leaf = engine.get_by_id(&oid(&kept_out.id)).await.unwrap();
    assert_eq!(found.name.as_deref(), Some("out"));
}

#[tokio::test]
async fn ignore_cascade_leaves_children_dangling() {
    let (_store, engine) = context();

    let grove = engine
        .insert(&Grove {
            name: Some("old".into()),
            ..Grove::default()
        })
        .await
        .unwrap();
    let sprig = engine
        .insert(&Sprig {
            name: Some("twig".into()),
            grove: grove.id.clone(),
            ..Sprig::default()
        })
        .await
        .unwrap();

    // Dropping the child from the list leaves its parent key in place.
    let mut shrunk: Grove = engine.get_by_id(&oid(&grove.id)).await.unwrap();
    shrunk.sprigs = Some(Vec::new());
    engine.update(&oid(&grove.id), &shrunk).await.unwrap();
    let found: Sprig = engine.get_by_id(&oid(&sprig.id)).await.unwrap();
    assert_eq!(found.grove, grove.id);

    // Deleting the parent leaves the child alive, its key now dangling.
    let other = engine
        .insert(&Grove {
            name: Some("new".into()),
            ..Grove::default()
        })
        .await
        .unwrap();
    let mut moved = found.clone();
    moved.grove = other.id.clone();
    engine.update(&oid(&sprig.id), &moved).await.unwrap();
    engine.delete::<Grove>(&oid(&other.id)).await.unwrap();

    let found: Sprig = engine.get_by_id(&oid(&sprig.id)).await.unwrap();
    assert_eq!(found.grove, other.id);
}

#[tokio::test]
async fn deleting_a_child_detaches_it_from_the_parent_list() {
    let (_store, engine) = context();

    let first = engine
        .insert(&Node {
            name: Some("first".into()),
            ..Node::default()
        })
        .await
        .unwrap();
    let second = engine
        .insert(&Node {
            name: Some("second".into()),
            ..Node::default()
        })
        .await
        .unwrap();
    let leaf = engine
        .insert(&Leaf {
            name: Some("leaf".into()),
            parent: first.id.clone(),
            ..Leaf::default()
        })
        .await
        .unwrap();

    let mut moved = leaf.clone();
    moved.parent = second.id.clone();
    engine.update(&oid(&leaf.id), &moved).await.unwrap();
    engine.delete::<Leaf>(&oid(&leaf.id)).await.unwrap();

    // The deleted child leaves its current parent's list; the old parent
    // was already emptied by the reparent.
    let found: Node = engine.get_by_id(&oid(&second.id)).await.unwrap();
    assert_eq!(found.children, None);
    let found: Node = engine.get_by_id(&oid(&first.id)).await.unwrap();
    assert_eq!(found.children, None);
}

#[tokio::test]
async fn entity_lists_resolve_with_one_query_per_field() {
    let (store, engine) = context();

    let mut people = Vec::new();
    for name in ["ada", "bob", "cleo"] {
        let person = engine
            .insert(&Person {
                name: Some(name.into()),
                ..Person::default()
            })
            .await
            .unwrap();
        people.push(person.id.unwrap());
    }
    let rosters = [vec![people[0], people[1]], vec![people[1], people[2]]];
    for (index, roster) in rosters.iter().enumerate() {
        let team = engine
            .insert(&Team {
                name: Some(format!("t{}", index)),
                ..Team::default()
            })
            .await
            .unwrap();
        for member in roster {
            engine
                .add_link::<Team>(&Id::Long(team.id.unwrap()), "members", &Id::Long(*member))
                .await
                .unwrap();
        }
    }

    let before = store.find_count();
    let teams = engine
        .gets_where::<Team>(&Condition::all(), &QueryOptions::new())
        .await
        .unwrap();
    // One query for the teams, one batched IN-list query for the members.
    assert_eq!(store.find_count() - before, 2);

    assert_eq!(teams.len(), 2);
    let first = teams[0].members.as_ref().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].name.as_deref(), Some("ada"));
    assert_eq!(first[1].name.as_deref(), Some("bob"));

    let person: Person = engine.get_by_id(&Id::Long(people[1])).await.unwrap();
    assert_eq!(person.teams, Some(vec![1, 2]));
}

#[tokio::test]
async fn failed_mirror_write_reports_a_post_action_error() {
    let (_store, engine) = context();

    let err = engine
        .insert(&Author {
            name: Some("ghost".into()),
            books: Some(vec!["f".repeat(24)]),
            ..Author::default()
        })
        .await
        .unwrap_err();
    match err {
        Error::PostAction { completed, .. } => assert_eq!(completed, 0),
        other => panic!("unexpected error: {:?}", other),
    }

    // The author document itself is committed.
    let found = engine
        .gets_where::<Author>(&Condition::all(), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name.as_deref(), Some("ghost"));
}

#[tokio::test]
async fn soft_deleted_documents_disappear_from_reads() {
    let (_store, engine) = context();

    let book = engine
        .insert(&Book {
            title: Some("gone".into()),
            ..Book::default()
        })
        .await
        .unwrap();
    engine.delete::<Book>(&oid(&book.id)).await.unwrap();

    assert!(matches!(
        engine.get_by_id::<Book>(&oid(&book.id)).await,
        Err(Error::NotFound)
    ));
    assert_eq!(
        engine
            .count_where::<Book>(&Condition::all(), &QueryOptions::new())
            .await
            .unwrap(),
        0
    );
}
