use clap::{App, Arg, SubCommand};
use spelltrain_hangman::word::{GenerationRequest, band_success_ratio, sanitize_topic};
use spelltrain_hangman::{
    Config, Difficulty, Game, GeneratorSettings, LazyOpenAiClient, WordListGenerator,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn topic_arg() -> Arg<'static> {
    Arg::with_name("topic").help("主题").required(true).index(1)
}

fn difficulty_arg() -> Arg<'static> {
    Arg::with_name("difficulty")
        .help("难度 (easy/medium/hard)")
        .required(true)
        .index(2)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("序列化失败: {}", e),
    }
}

fn parse_difficulty(value: Option<&str>) -> Option<Difficulty> {
    match value.unwrap_or_default().parse::<Difficulty>() {
        Ok(difficulty) => Some(difficulty),
        Err(e) => {
            eprintln!("{}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let matches = App::new("单词表生成器")
        .version("1.0")
        .about("调用大模型生成猜词游戏单词表")
        .subcommand(
            SubCommand::with_name("generate")
                .about("生成单词表")
                .arg(topic_arg())
                .arg(difficulty_arg()),
        )
        .subcommand(
            SubCommand::with_name("evaluate")
                .about("评估主题是否可用")
                .arg(topic_arg()),
        )
        .subcommand(
            SubCommand::with_name("hangman")
                .about("生成单词表并转换为猜词关卡")
                .arg(topic_arg())
                .arg(difficulty_arg())
                .arg(
                    Arg::with_name("route")
                        .help("关卡路由编号")
                        .long("route")
                        .takes_value(true)
                        .default_value("1"),
                ),
        )
        .get_matches();

    // 初始化配置
    if let Err(e) = Config::init() {
        eprintln!("配置初始化失败: {}", e);
        return;
    }
    let config = Config::get();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter()))
        .with_writer(std::io::stderr)
        .init();

    let generator = WordListGenerator::new(
        Arc::new(LazyOpenAiClient::new(config.openai.clone())),
        GeneratorSettings::from_config(&config.openai, &config.generator),
    );

    match matches.subcommand() {
        Some(("generate", args)) => {
            let topic = sanitize_topic(args.value_of("topic").unwrap_or_default());
            let request = match GenerationRequest::parse(
                &topic,
                args.value_of("difficulty").unwrap_or_default(),
            ) {
                Ok(request) => request,
                Err(e) => {
                    eprintln!("{}", e);
                    return;
                }
            };
            let difficulty = request.difficulty;
            match generator.generate(&request.topic, difficulty).await {
                Ok(words) => {
                    print_json(&words);
                    eprintln!(
                        "难度区间命中率: {:.0}%",
                        band_success_ratio(&words, difficulty) * 100.0
                    );
                }
                Err(e) => eprintln!("{}", e),
            }
        }
        Some(("evaluate", args)) => {
            let topic = sanitize_topic(args.value_of("topic").unwrap_or_default());
            match generator.evaluate_topic(&topic).await {
                Ok(evaluation) => print_json(&evaluation),
                Err(e) => eprintln!("{}", e),
            }
        }
        Some(("hangman", args)) => {
            let topic = sanitize_topic(args.value_of("topic").unwrap_or_default());
            let Some(difficulty) = parse_difficulty(args.value_of("difficulty")) else {
                return;
            };
            let route: u32 = match args.value_of("route").unwrap_or("1").parse() {
                Ok(route) => route,
                Err(_) => {
                    eprintln!("路由编号必须是数字");
                    return;
                }
            };
            match generator.generate(&topic, difficulty).await {
                Ok(words) => print_json(&Game::new(words).generate_hangman_games(route)),
                Err(e) => eprintln!("{}", e),
            }
        }
        _ => {
            println!("请使用 --help 查看可用命令");
        }
    }
}
