use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use nixconf::{
    Attribute, EditorConfig, EvaluationError, OptionDefinition, OptionType, Session, Value,
    cache::EvaluationCache,
    nix::{Evaluator, OptionRecord, syntax::parse_literal},
};
use serde_json::json;

const SOURCE: &str = r#"{ config, pkgs, ... }:

{
  imports = [ ./hardware-configuration.nix ];

  networking.hostName = "box"; # the host
  services.openssh.enable = true;
  environment.systemPackages = with pkgs; [ vim git ];

  users.users.alice = {
    isNormalUser = true;
    home = "/home/alice";
  };
}
"#;

/// Evaluates literals only, like `nix-instantiate` without nixpkgs.
struct LiteralEvaluator;

impl Evaluator for LiteralEvaluator {
    fn option_records(&self, _source: &Path) -> nixconf::Result<BTreeMap<String, OptionRecord>> {
        Ok([
            ("networking.hostName", OptionRecord::new("string").with_default("nixos")),
            (
                "networking.firewall.allowedTCPPorts",
                OptionRecord::new("list of 16 bit unsigned integer; between 0 and 65535 (both inclusive)")
                    .with_default(json!([])),
            ),
            ("services.openssh.enable", OptionRecord::new("boolean").with_default(false)),
            (
                "environment.systemPackages",
                OptionRecord::new("list of package").with_default(json!({
                    "_type": "literalExpression",
                    "text": "[ ]",
                })),
            ),
            ("users.users", OptionRecord::new("attribute set of (submodule)")),
            ("users.users.<name>.home", OptionRecord::new("path")),
            (
                "users.users.<name>.isNormalUser",
                OptionRecord::new("boolean").with_default(false),
            ),
        ]
        .into_iter()
        .map(|(name, record)| (name.to_string(), record))
        .collect())
    }

    fn eval_expression(&self, expression: &str) -> Result<Value, EvaluationError> {
        parse_literal(expression).ok_or_else(|| EvaluationError {
            expression: expression.to_string(),
            diagnostic: "error: undefined variable 'pkgs'".to_string(),
        })
    }
}

fn attr(s: &str) -> Attribute {
    s.parse().unwrap()
}

fn session(dir: &Path, source: PathBuf) -> Session {
    let config = EditorConfig {
        configuration_path: source,
        store_root: Some(dir.join("store")),
        ..EditorConfig::default()
    };
    Session::new(config)
        .with_evaluator(Box::new(LiteralEvaluator))
        .with_cache(Arc::new(EvaluationCache::new()))
}

#[test]
fn test_load_browse_edit_and_save() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("configuration.nix");
    fs::write(&source, SOURCE).unwrap();
    let session = session(dir.path(), source.clone());

    let mut tree = session.option_tree().unwrap();

    // browsing
    assert_eq!(
        tree.children(&Attribute::root()),
        [attr("users"), attr("networking"), attr("environment"), attr("services")]
    );
    assert_eq!(
        tree.next_branching_point(&attr("users")).unwrap(),
        attr("users.users")
    );
    assert_eq!(
        tree.get_type(&attr("users.users.alice.home")),
        Some(&OptionType::Path)
    );
    assert_eq!(
        tree.get_option_value(&attr("networking.firewall.allowedTCPPorts"))
            .and_then(OptionDefinition::obj),
        Some(&json!([]))
    );

    // the one non-literal expression fails alone
    let errors: Vec<_> = tree.evaluation_errors().map(|(a, _)| a.clone()).collect();
    assert_eq!(errors, [attr("environment.systemPackages")]);
    assert_eq!(
        tree.get_definition(&attr("environment.systemPackages"))
            .expression(),
        Some("with pkgs; [ vim git ]")
    );
    assert_eq!(
        tree.get_definition(&attr("users.users.alice.isNormalUser"))
            .obj(),
        Some(&json!(true))
    );

    // editing
    let baseline = tree.baseline();
    tree.set_definition(&attr("networking.hostName"), OptionDefinition::from_object("edge"))
        .unwrap();
    tree.set_definition(
        &attr("users.users.alice.home"),
        OptionDefinition::from_expression("\"/srv/alice\"")
            .evaluate(session.evaluator())
            .unwrap(),
    )
    .unwrap();
    tree.set_definition(
        &attr("users.users.bob.isNormalUser"),
        OptionDefinition::from_object(true),
    )
    .unwrap();
    tree.set_definition(&attr("services.openssh.enable"), OptionDefinition::undefined())
        .unwrap();
    assert!(tree.set_definition(&attr("no.such.option"), OptionDefinition::from_object(1)).is_err());
    assert_eq!(tree.iter_changes(&baseline).count(), 4);

    let saved = session.apply_changes(&tree, &baseline).unwrap();
    assert_eq!(
        saved,
        dir.path()
            .join("store/configurations")
            .join(source.strip_prefix("/").unwrap())
    );
    assert_eq!(
        fs::read_to_string(&saved).unwrap(),
        r#"{ config, pkgs, ... }:

{
  imports = [ ./hardware-configuration.nix ];

  networking.hostName = "edge"; # the host
  environment.systemPackages = with pkgs; [ vim git ];

  users.users.alice = {
    isNormalUser = true;
    home = "/srv/alice";
  };
  users.users.bob.isNormalUser = true;
}
"#
    );
    assert_eq!(fs::read_to_string(&source).unwrap(), SOURCE);

    // the saved file loads back with the edits as its configuration
    let reloaded = self::session(dir.path(), saved).option_tree().unwrap();
    assert_eq!(
        reloaded
            .get_definition(&attr("networking.hostName"))
            .obj(),
        Some(&json!("edge"))
    );
    assert!(
        reloaded
            .get_definition(&attr("services.openssh.enable"))
            .is_undefined()
    );
    assert_eq!(
        reloaded
            .get_option_value(&attr("services.openssh.enable"))
            .and_then(OptionDefinition::obj),
        Some(&json!(false))
    );
    assert!(reloaded.contains(&attr("users.users.bob")));
}

#[test]
fn test_unknown_type_aborts_loading() {
    struct Unsupported;
    impl Evaluator for Unsupported {
        fn option_records(
            &self,
            _source: &Path,
        ) -> nixconf::Result<BTreeMap<String, OptionRecord>> {
            Ok(BTreeMap::from([(
                "a".to_string(),
                OptionRecord::new("strange new type"),
            )]))
        }
        fn eval_expression(&self, expression: &str) -> Result<Value, EvaluationError> {
            LiteralEvaluator.eval_expression(expression)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("configuration.nix");
    fs::write(&source, "{ a = 1; }").unwrap();
    let session = session(dir.path(), source).with_evaluator(Box::new(Unsupported));
    assert!(matches!(
        session.option_tree(),
        Err(nixconf::Error::UnsupportedType(_))
    ));
}
