use super::*;
use crate::config::Config;
use crate::database::sqlite::NewKnowledgeEntry;
use tempfile::TempDir;

const ECOMMERCE: &str = "ECOMMERCE_BUSINESS_CONTEXT";

async fn open_assembler(custom: Vec<CustomScenario>) -> (TempDir, PromptAssembler) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.scenarios = custom;

    let store = KnowledgeStore::open(&config)
        .await
        .expect("Failed to open knowledge store");
    let assembler = PromptAssembler::new(Arc::new(store), ScenarioCatalog::from_config(&config));
    (temp_dir, assembler)
}

async fn add(assembler: &PromptAssembler, title: &str, content: &str, category: &str) -> i64 {
    assembler
        .store()
        .add_entry(NewKnowledgeEntry::new(title, content).with_category(category))
        .await
        .expect("add entry")
        .id
}

fn ecommerce() -> Scenario {
    Scenario::BuiltIn(ScenarioKind::Ecommerce)
}

#[tokio::test]
async fn prompt_sections_in_order() {
    let (_temp_dir, assembler) = open_assembler(Vec::new()).await;
    let policy = add(
        &assembler,
        "Return Policy",
        "Returns accepted within 30 days",
        ECOMMERCE,
    )
    .await;
    add(&assembler, "Shipping", "We ship worldwide in 3-5 days", ECOMMERCE).await;

    let history = vec![
        ChatTurn::user("Hi, I bought a lamp last week"),
        ChatTurn::assistant("Thanks for reaching out! How can I help?"),
    ];
    let assembled = assembler
        .build_with_sources(
            &ecommerce(),
            "How do I return an item?",
            &history,
            Some("Store hours: 9-17"),
        )
        .await
        .expect("build prompt");
    let prompt = &assembled.prompt;

    let system = assembler.catalog().system_prompt(&ecommerce());
    assert!(prompt.starts_with(system.trim_end()));

    let positions: Vec<usize> = [
        "## Business Context\nStore hours: 9-17",
        "## Relevant Business Context (Top 3 Matches)\n\n**Source 1: Return Policy**\nReturns accepted within 30 days",
        "## Previous Conversation\nCustomer: Hi, I bought a lamp last week\nAssistant: Thanks for reaching out! How can I help?",
        "## Current Customer Query\nCustomer: How do I return an item?",
    ]
    .iter()
    .map(|section| prompt.find(section).expect("section present"))
    .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

    assert!(prompt.ends_with(CLOSING_INSTRUCTION));
    assert_eq!(assembled.sources.first().map(|e| e.id), Some(policy));
}

#[tokio::test]
async fn empty_sections_are_omitted() {
    let (_temp_dir, assembler) = open_assembler(Vec::new()).await;

    let prompt = assembler
        .build(&ecommerce(), "Hello?", &[], Some("   "))
        .await
        .expect("build prompt");

    let system = assembler.catalog().system_prompt(&ecommerce());
    assert_eq!(
        prompt,
        format!(
            "{}\n\n## Current Customer Query\nCustomer: Hello?\n\n{}",
            system.trim_end(),
            CLOSING_INSTRUCTION
        )
    );
    assert!(!prompt.contains("## Business Context"));
    assert!(!prompt.contains("## Previous Conversation"));
    assert!(!prompt.contains("Relevant Business Context"));
}

#[tokio::test]
async fn history_is_limited_to_recent_turns() {
    let (_temp_dir, assembler) = open_assembler(Vec::new()).await;
    let history: Vec<ChatTurn> = (1..=8)
        .map(|i| {
            if i % 2 == 1 {
                ChatTurn::user(format!("question {}", i))
            } else {
                ChatTurn::assistant(format!("answer {}", i))
            }
        })
        .collect();

    let prompt = assembler
        .build(&ecommerce(), "One more thing", &history, None)
        .await
        .expect("build prompt");

    assert!(prompt.contains(
        "## Previous Conversation\nCustomer: question 3\nAssistant: answer 4\n\
         Customer: question 5\nAssistant: answer 6\nCustomer: question 7\nAssistant: answer 8"
    ));
    assert!(!prompt.contains("question 1"));
    assert!(!prompt.contains("answer 2"));

    let no_history = assembler
        .clone()
        .with_history_window(0)
        .build(&ecommerce(), "One more thing", &history, None)
        .await
        .expect("build prompt");
    assert!(!no_history.contains("## Previous Conversation"));
}

#[tokio::test]
async fn knowledge_is_scoped_to_scenario_category() {
    let (_temp_dir, assembler) = open_assembler(Vec::new()).await;
    add(
        &assembler,
        "API Returns",
        "Return codes for the billing API",
        "SAAS_BUSINESS_CONTEXT",
    )
    .await;

    let assembled = assembler
        .build_with_sources(&ecommerce(), "return codes billing API", &[], None)
        .await
        .expect("build prompt");
    assert!(assembled.sources.is_empty());
    assert!(!assembled.prompt.contains("API Returns"));

    let saas = assembler
        .build_with_sources(
            &Scenario::BuiltIn(ScenarioKind::Saas),
            "return codes billing API",
            &[],
            None,
        )
        .await
        .expect("build prompt");
    assert_eq!(saas.sources.len(), 1);
    assert!(saas.prompt.contains("**Source 1: API Returns**"));
}

#[tokio::test]
async fn sources_respect_top_k() {
    let (_temp_dir, assembler) = open_assembler(Vec::new()).await;
    for i in 0..5 {
        add(
            &assembler,
            &format!("Refund rule {}", i),
            "Refunds are issued to the original payment method",
            ECOMMERCE,
        )
        .await;
    }

    let assembled = assembler
        .clone()
        .with_top_k(2)
        .build_with_sources(&ecommerce(), "refunds payment method", &[], None)
        .await
        .expect("build prompt");
    assert_eq!(assembled.sources.len(), 2);
    assert!(assembled.prompt.contains("(Top 2 Matches)"));
    assert!(assembled.prompt.contains("\n\n---\n\n**Source 2: "));
    assert!(!assembled.prompt.contains("**Source 3: "));
}

#[tokio::test]
async fn custom_scenario_prompt_and_category() {
    let florist = CustomScenario::new("florist", "Florist", "You help flower shop customers.");
    let (_temp_dir, assembler) = open_assembler(vec![florist]).await;
    add(
        &assembler,
        "Delivery",
        "Flowers are delivered every day before noon",
        "FLORIST_BUSINESS_CONTEXT",
    )
    .await;

    let scenario = assembler.catalog().resolve("FLORIST");
    let prompt = assembler
        .build(&scenario, "When are flowers delivered?", &[], None)
        .await
        .expect("build prompt");

    assert!(prompt.starts_with("You help flower shop customers.\n\n## Relevant Business Context"));
    assert!(prompt.contains("**Source 1: Delivery**"));

    let unknown = assembler
        .build(&Scenario::Custom("bakery".to_string()), "Hi", &[], None)
        .await
        .expect("build prompt");
    assert!(unknown.starts_with(GENERIC_SYSTEM_PROMPT));
}

#[tokio::test]
async fn business_context_for_scenario() {
    let (_temp_dir, assembler) = open_assembler(Vec::new()).await;
    assert_eq!(
        assembler
            .business_context_for(&ecommerce())
            .await
            .expect("business context"),
        None
    );

    for (title, content) in [
        ("Hours", "Open 9-17"),
        ("Returns", "30 days"),
        ("Shipping", "Worldwide"),
        ("Warranty", "Two years"),
    ] {
        add(&assembler, title, content, ECOMMERCE).await;
    }

    let context = assembler
        .business_context_for(&ecommerce())
        .await
        .expect("business context");
    assert_eq!(
        context.as_deref(),
        Some("**Hours**\nOpen 9-17\n\n**Returns**\n30 days\n\n**Shipping**\nWorldwide")
    );
}

#[test]
fn context_gaps_for_conversation() {
    let history = vec![
        ChatTurn::user("Where is my ORDER?"),
        ChatTurn::assistant("Let me check the shipping status."),
        ChatTurn::user("I would like a refund"),
    ];

    let gaps = analyze_context_gaps(&history, ScenarioKind::Ecommerce);
    assert_eq!(gaps.mentioned_keywords, vec!["order", "shipping", "refund"]);
    assert!((gaps.context_coverage - 50.0).abs() < 1e-9);
    assert_eq!(
        gaps.suggested_context,
        "Consider uploading business documentation about: product, order, shipping, return, refund, payment"
    );

    let empty = analyze_context_gaps(&[], ScenarioKind::ServiceBusiness);
    assert!(empty.mentioned_keywords.is_empty());
    assert!(empty.context_coverage.abs() < f64::EPSILON);
}

#[test]
fn chat_turns_deserialize_from_role_labels() {
    let turns: Vec<ChatTurn> = serde_json::from_str(
        r#"[{"role": "USER", "content": "hi"}, {"role": "assistant", "content": "hello"}]"#,
    )
    .expect("history parses");

    assert_eq!(
        turns,
        vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")]
    );
    assert_eq!(ChatRole::User.label(), "Customer");
}
