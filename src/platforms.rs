/// Supported platform registry and page-to-platform matching
use crate::domain::{extract_hostname, host_and_path, strip_www};
use crate::media::{CustomSite, MediaType};

/// CSS selector lists, tried in order; the first one resolving to a
/// non-empty element wins.
#[derive(Debug, PartialEq)]
pub struct Selectors {
    pub title: &'static [&'static str],
    pub progress: &'static [&'static str],
    pub episode: &'static [&'static str],
}

#[derive(Debug, PartialEq)]
pub struct PlatformDescriptor {
    pub name: &'static str,
    /// Domain patterns. A pattern containing `/` is matched against
    /// host + path, anything else against the hostname alone.
    pub patterns: &'static [&'static str],
    pub media_type: MediaType,
    pub selectors: Selectors,
    /// Regex recognising the platform's metadata API requests.
    pub api_pattern: Option<&'static str>,
}

/// Selectors used for custom sites and anything without its own entry.
pub static GENERIC_SELECTORS: Selectors = Selectors {
    title: &["h1", ".title", "[class*='title']", "title"],
    progress: &[".progress-bar", "[class*='progress']"],
    episode: &[],
};

const HEADING: Selectors = Selectors {
    title: &["h1", ".title"],
    progress: &[".progress-bar"],
    episode: &[],
};

const FREE_STREAM: Selectors = Selectors {
    title: &[".heading-name", "h1"],
    progress: &[".progress-bar"],
    episode: &[],
};

const fn site(
    name: &'static str,
    patterns: &'static [&'static str],
    media_type: MediaType,
    selectors: Selectors,
) -> PlatformDescriptor {
    PlatformDescriptor {
        name,
        patterns,
        media_type,
        selectors,
        api_pattern: None,
    }
}

/// Built-in platforms in match order. Order matters: a hostname listed
/// under two entries resolves to the earlier one.
pub static PLATFORMS: &[PlatformDescriptor] = &[
    // Video streaming
    site(
        "netflix",
        &["netflix.com"],
        MediaType::Tvshow,
        Selectors {
            title: &["[data-uia='video-title']"],
            progress: &[".watch-video--progress-bar"],
            episode: &[],
        },
    ),
    site(
        "youtube",
        &["youtube.com"],
        MediaType::Video,
        Selectors {
            title: &[
                "ytd-watch-metadata h1.ytd-watch-metadata yt-formatted-string",
                "#title h1 yt-formatted-string",
                "h1.ytd-video-primary-info-renderer yt-formatted-string",
                ".ytp-title-link",
                "ytd-reel-video-renderer h2.title",
                "ytd-watch-metadata h1",
            ],
            progress: &[".ytp-progress-bar"],
            episode: &[],
        },
    ),
    site(
        "primevideo",
        &["primevideo.com", "amazon.com/gp/video"],
        MediaType::Movie,
        Selectors {
            title: &["[data-automation-id='title']"],
            progress: &[".atvwebplayersdk-progress-bar"],
            episode: &[],
        },
    ),
    site(
        "disneyplus",
        &["disneyplus.com"],
        MediaType::Movie,
        Selectors {
            title: &["[data-testid='title']"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site(
        "hulu",
        &["hulu.com/watch"],
        MediaType::Tvshow,
        Selectors {
            title: &[".metadata__title"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site(
        "crunchyroll",
        &["crunchyroll.com/watch"],
        MediaType::Anime,
        Selectors {
            title: &["[data-testid='vilos-title']"],
            progress: &[".vjs-progress-holder"],
            episode: &[],
        },
    ),
    site(
        "hurawatch",
        &["hurawatch.tw", "hurawatch.cc"],
        MediaType::Movie,
        Selectors {
            title: &[".heading-name", ".film-name", "h1.title", ".dp-i-title"],
            progress: &[".progress-bar", "[class*='progress']"],
            episode: &[],
        },
    ),
    PlatformDescriptor {
        name: "filmboom",
        patterns: &["filmboom.top", "moviebox.ph"],
        media_type: MediaType::Movie,
        selectors: Selectors {
            title: &[".title", "h1", ".movie-title", ".video-title", ".detail-title"],
            progress: &[".progress-bar", "[class*='progress']"],
            episode: &[],
        },
        api_pattern: Some(r"wefeed-h5-bff/web/(?:subject/detail\?subjectId=(\d+)|resource/streams)"),
    },
    site("fmovies", &["fmovies.to", "fmovies.wtf", "fmovies.co"], MediaType::Movie, FREE_STREAM),
    site(
        "solarmovie",
        &["solarmovie.pe", "solarmovie.to", "solarmovie.one", "solarmovie.cr"],
        MediaType::Movie,
        FREE_STREAM,
    ),
    site("movies123", &["123movies.ai", "123movies.to"], MediaType::Movie, FREE_STREAM),
    site("putlocker", &["putlocker.vip"], MediaType::Movie, FREE_STREAM),
    site("yesmovies", &["yesmovies.ag", "yesmovies.to"], MediaType::Movie, FREE_STREAM),
    site(
        "soap2day",
        &["soap2day.to", "soap2day.rs", "soap2day.day"],
        MediaType::Tvshow,
        FREE_STREAM,
    ),
    // Anime streaming
    PlatformDescriptor {
        name: "9anime",
        patterns: &["9animetv.to", "9anime.to", "9anime.gs"],
        media_type: MediaType::Anime,
        selectors: Selectors {
            title: &[".film-name", "h1.title", ".anime-title", ".dp-i-title"],
            progress: &[".progress-bar", "[class*='progress']"],
            episode: &[".server-notice b", ".episodes .active"],
        },
        api_pattern: Some(r"/ajax/episode/|servers\?episodeId=(\d+)"),
    },
    site(
        "gogoanime",
        &["gogoanime.hu", "gogoanime.gg", "anitaku.to", "gogoanime.by"],
        MediaType::Anime,
        Selectors {
            title: &[".anime_video_body_cate a", "h1", ".video-title"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site(
        "zoro",
        &["zoro.to", "aniwatch.to", "zoroto.se"],
        MediaType::Anime,
        Selectors {
            title: &[".film-name", "h1.name"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site(
        "animepahe",
        &["animepahe.com", "animepahe.ru"],
        MediaType::Anime,
        Selectors {
            title: &[".theatre-info h1", ".anime-title"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site("hianime", &["hianime.to", "hianime.tv"], MediaType::Anime, HEADING),
    site("animekai", &["animekai.to", "animekai.cc"], MediaType::Anime, HEADING),
    site("aniwave", &["aniwave.to", "aniwave.cc", "aniwave.se"], MediaType::Anime, HEADING),
    site("kaido", &["kaido.to", "kaido.cc"], MediaType::Anime, HEADING),
    site("bilibili", &["bilibili.tv", "bilibili.com"], MediaType::Anime, HEADING),
    // Reading
    site(
        "goodreads",
        &["goodreads.com/book"],
        MediaType::Book,
        Selectors {
            title: &["#bookTitle"],
            progress: &[".progress"],
            episode: &[],
        },
    ),
    site(
        "kindle",
        &["read.amazon.com"],
        MediaType::Book,
        Selectors {
            title: &["#book-title"],
            progress: &["#kindleReader_progress"],
            episode: &[],
        },
    ),
    PlatformDescriptor {
        name: "mangadex",
        patterns: &["mangadex.org/chapter"],
        media_type: MediaType::Manga,
        selectors: Selectors {
            title: &[".manga-title", "[data-title]", "h1"],
            progress: &[".chapter-progress"],
            episode: &[],
        },
        api_pattern: Some(r"api\.mangadex\.org/chapter/([a-f0-9-]+)"),
    },
    site(
        "webtoon",
        &["webtoons.com"],
        MediaType::Manga,
        Selectors {
            title: &[".subj_episode", ".subj", ".episode__title", ".detail_lst .subj", "h1"],
            progress: &[".progress-bar"],
            episode: &[".episode-num", ".episode_no", "[class*='episode']"],
        },
    ),
    site(
        "tapas",
        &["tapas.io"],
        MediaType::Manga,
        Selectors {
            title: &[".title", "h1.series-title"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site(
        "comick",
        &["comick.io", "comick.fun", "comick.dev"],
        MediaType::Manga,
        Selectors {
            title: &["h1", ".chapter-title"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site(
        "mangakakalot",
        &["mangakakalot.com", "manganato.com", "mangakakalot.to", "chapmanganato.to"],
        MediaType::Manga,
        Selectors {
            title: &[".chapter-name", "h1"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site(
        "mangasee",
        &["mangasee123.com", "weebcentral.com"],
        MediaType::Manga,
        Selectors {
            title: &[".MainContainer h1", ".manga-info h1"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site(
        "bato",
        &["bato.to", "bato.si"],
        MediaType::Manga,
        Selectors {
            title: &["h3.item-title", ".chapter-name"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site(
        "readcomiconline",
        &["readcomiconline.li"],
        MediaType::Comic,
        Selectors {
            title: &[".bigChar", "h1"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
    site("mangafire", &["mangafire.to"], MediaType::Manga, HEADING),
    site("mangapill", &["mangapill.com"], MediaType::Manga, HEADING),
    site("asurascans", &["asurascans.com", "asuracomic.net"], MediaType::Manga, HEADING),
    site("tcbscans", &["tcbscans.me", "tcbscans.com"], MediaType::Manga, HEADING),
    // Tracking sites
    site(
        "myanimelist",
        &["myanimelist.net/anime"],
        MediaType::Anime,
        Selectors {
            title: &[".title-name"],
            progress: &[],
            episode: &[".di-ib"],
        },
    ),
    site(
        "anilist",
        &["anilist.co/anime"],
        MediaType::Anime,
        Selectors {
            title: &[".content h1"],
            progress: &[],
            episode: &[".data-set"],
        },
    ),
    // Drama streaming
    site(
        "kisskh",
        &["kisskh.id", "kisskh.me", "kisskh.co"],
        MediaType::Tvshow,
        Selectors {
            title: &[".name", "h1", ".drama-title"],
            progress: &[".progress-bar", "[class*='progress']"],
            episode: &[],
        },
    ),
    site(
        "dramacool",
        &["dramacool.sr", "dramacool.cr", "asianc.co"],
        MediaType::Tvshow,
        Selectors {
            title: &[".details h1", ".info h1", ".drama-name"],
            progress: &[".progress-bar"],
            episode: &[],
        },
    ),
];

/// The platform a page resolved to: a built-in entry or a custom site.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPlatform {
    pub name: String,
    pub media_type: MediaType,
    pub selectors: &'static Selectors,
    pub api_pattern: Option<&'static str>,
    pub custom: bool,
}

impl From<&'static PlatformDescriptor> for MatchedPlatform {
    fn from(descriptor: &'static PlatformDescriptor) -> Self {
        MatchedPlatform {
            name: descriptor.name.to_string(),
            media_type: descriptor.media_type,
            selectors: &descriptor.selectors,
            api_pattern: descriptor.api_pattern,
            custom: false,
        }
    }
}

/// First built-in entry with a pattern contained in the page address.
pub fn match_builtin(page_url: &str) -> Option<&'static PlatformDescriptor> {
    let hostname = extract_hostname(page_url)?;
    let hostname = strip_www(&hostname);
    let host_path = host_and_path(page_url).unwrap_or_else(|| hostname.to_string());

    PLATFORMS.iter().find(|descriptor| {
        descriptor.patterns.iter().any(|pattern| {
            if pattern.contains('/') {
                host_path.contains(pattern)
            } else {
                hostname.contains(pattern)
            }
        })
    })
}

/// Resolve a page against the built-in registry, then the user's custom sites.
pub fn match_platform(page_url: &str, custom_sites: &[CustomSite]) -> Option<MatchedPlatform> {
    if let Some(descriptor) = match_builtin(page_url) {
        return Some(descriptor.into());
    }

    let hostname = extract_hostname(page_url)?;
    let hostname = strip_www(&hostname);

    custom_sites
        .iter()
        .filter(|site| site.is_enabled())
        .find_map(|site| {
            let site_host = extract_hostname(site.address()?)?;
            let site_domain = strip_www(&site_host);
            if site_domain.is_empty() || !hostname.contains(site_domain) {
                return None;
            }
            log::debug!("Matched custom site {} ({})", site.name, site_domain);
            Some(MatchedPlatform {
                name: if site.name.is_empty() {
                    hostname.to_string()
                } else {
                    site.name.clone()
                },
                media_type: site.media_type,
                selectors: &GENERIC_SELECTORS,
                api_pattern: None,
                custom: true,
            })
        })
}
